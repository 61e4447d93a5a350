//! Method descriptors and introspection helpers

/// Static description of one remotely callable method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Wire name of the method
    pub name: &'static str,
    /// Names of the method parameters, in declaration order
    pub params: &'static [&'static str],
    /// Help text (from the variant documentation)
    pub help: &'static str,
    /// Whether the method refuses unauthenticated callers
    pub sensitive: bool,
}

impl MethodDescriptor {
    /// Human-readable signature, e.g. `getEnviron(name)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.join(", "))
    }

    /// Documentation as returned by `system.methodHelp`
    pub fn documentation(&self) -> String {
        let help = self
            .help
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        let help = help.trim();

        let mut doc = self.signature();
        if !help.is_empty() {
            doc.push_str("\n\n");
            doc.push_str(help);
        }
        if self.sensitive {
            doc.push_str("\n\n(requires authentication)");
        }
        doc
    }
}

/// A closed set of calls with a generated introspection table
pub trait RpcMethod {
    /// All methods of this call set
    fn table() -> &'static [MethodDescriptor];

    /// Wire name of this call
    fn name(&self) -> &'static str;

    /// Descriptor of this call
    fn descriptor(&self) -> Option<&'static MethodDescriptor> {
        lookup(Self::table(), self.name())
    }

    /// Whether this call needs an authenticated request
    ///
    /// A call missing from the table is treated as sensitive.
    fn requires_auth(&self) -> bool {
        self.descriptor().map(|d| d.sensitive).unwrap_or(true)
    }
}

/// Find a method by wire name
pub fn lookup(
    table: &'static [MethodDescriptor],
    name: &str,
) -> Option<&'static MethodDescriptor> {
    table.iter().find(|d| d.name == name)
}

/// Names of all methods in a table (answer to `system.listMethods`)
pub fn list_methods(table: &[MethodDescriptor]) -> Vec<String> {
    let mut names: Vec<String> = table.iter().map(|d| d.name.to_string()).collect();
    names.sort();
    names
}

/// Help text of one method (answer to `system.methodHelp`)
pub fn method_help(table: &'static [MethodDescriptor], name: &str) -> String {
    match lookup(table, name) {
        Some(descriptor) => descriptor.documentation(),
        None => format!("No such method: {}", name),
    }
}
