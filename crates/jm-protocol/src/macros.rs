//! Declarative generator for call enums and their method tables

/// Declare a call enum together with its introspection table.
///
/// Each variant names its wire method and may be flagged `(sensitive)`,
/// meaning the server answers with the "not authenticated" sentinel unless
/// the request carried a valid challenge. Doc comments become the help text
/// returned by `system.methodHelp`.
macro_rules! rpc_calls {
    (@sensitive sensitive) => { true };
    (@sensitive) => { false };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident in $table:ident {
            $(
                $(#[doc = $doc:literal])*
                $variant:ident $({ $($field:ident : $fty:ty),* $(,)? })? => $wire:literal $(($flag:ident))?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(tag = "method", content = "params")]
        $vis enum $name {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $wire)]
                $variant $({ $($field : $fty),* })?,
            )*
        }

        #[doc = concat!("Introspection table for [`", stringify!($name), "`].")]
        $vis const $table: &[$crate::method::MethodDescriptor] = &[
            $(
                $crate::method::MethodDescriptor {
                    name: $wire,
                    params: &[$($(stringify!($field)),*)?],
                    help: concat!($($doc, "\n"),*),
                    sensitive: rpc_calls!(@sensitive $($flag)?),
                },
            )*
        ];

        impl $crate::method::RpcMethod for $name {
            fn table() -> &'static [$crate::method::MethodDescriptor] {
                $table
            }

            fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant { .. } => $wire, )*
                }
            }
        }
    };
}
