//! Key management

use std::path::Path;

use anyhow::{Context, Result};
use jm_core::auth::KeyStore;
use jm_core::host;
use ssh_key::{HashAlg, PublicKey};

use crate::output::{print_info, print_success, print_warning};

/// Create the local key pair if missing and print its public half
pub fn keys_init(store: &KeyStore) -> Result<()> {
    let existed = store.private_key_path().exists();
    let key = store
        .load_or_create()
        .context("Failed to create key pair")?;

    if existed {
        print_info(&format!("Key already exists at {:?}", store.private_key_path()));
    } else {
        print_success(&format!("Created key at {:?}", store.private_key_path()));
    }
    print_public(key.public_key())
}

/// Print the local public key as an `authorized_keys` line
pub fn keys_show(store: &KeyStore) -> Result<()> {
    match store.load().context("Failed to read key")? {
        Some(key) => print_public(key.public_key()),
        None => {
            print_warning(&format!("No key at {:?}", store.private_key_path()));
            print_info("Run 'jobmesh keys init' to create one");
            Ok(())
        }
    }
}

/// Allow `user` to authenticate with the public key in `key_file`
pub fn keys_authorize(store: &KeyStore, user: &str, key_file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(key_file)
        .with_context(|| format!("Failed to read {:?}", key_file))?;
    // Accept both a bare OpenSSH key and an "<user> <key>" line
    let key_text = text
        .split_once(char::is_whitespace)
        .filter(|(first, _)| !first.starts_with("ssh-"))
        .map(|(_, rest)| rest)
        .unwrap_or(&text);
    let key = PublicKey::from_openssh(key_text.trim())
        .with_context(|| format!("{:?} does not hold an OpenSSH public key", key_file))?;

    store
        .authorize(user, &key)
        .context("Failed to update authorized_keys")?;
    print_success(&format!(
        "Authorized {} ({})",
        user,
        key.fingerprint(HashAlg::Sha256)
    ));
    Ok(())
}

fn print_public(key: &PublicKey) -> Result<()> {
    let openssh = key.to_openssh().context("Failed to encode public key")?;
    print_info(&format!("Fingerprint: {}", key.fingerprint(HashAlg::Sha256)));
    println!("{} {}", host::user_name(), openssh);
    Ok(())
}
