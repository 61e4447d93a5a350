//! Calls answered by the meta-server

use crate::worker::WorkerCall;

rpc_calls! {
    /// Request understood by the meta-server (directory)
    pub enum MetaCall in META_METHODS {
        /// Always true; identifies the endpoint as a meta-server
        IsMetaServer => "isMetaServer",
        /// Register a worker listening on ip:port with the given process ID
        RegisterServer { ip: String, pid: u32, port: u16 } => "registerServer",
        /// Remove a worker from the directory
        DeregisterServer { ip: String, pid: u32, port: u16 } => "deregisterServer",
        /// Snapshot of all known workers and their metadata
        List => "list",
        /// Relay one call to the worker at ip:port and return its result or a failure description
        ForwardCommand { ip: String, port: u16, call: WorkerCall } => "forwardCommand",
        /// Scan additional comma-separated subnets (plus the configured ones) in the background
        Scan { subnets: Option<String> } => "scan",
        /// Scan the configured subnets in the background
        Collect => "collect",
        /// Shut the meta-server down
        Kill => "kill" (sensitive),
        /// Names of all available methods
        ListMethods => "system.listMethods",
        /// Documentation of one method
        MethodHelp { method: String } => "system.methodHelp",
    }
}
