//! Calls answered by a worker server

rpc_calls! {
    /// Request understood by the RPC endpoint embedded in every job
    pub enum WorkerCall in WORKER_METHODS {
        /// Always true; identifies the endpoint as a jobmesh worker
        IsWorker => "isWorker",
        /// True while the job keeps producing output at its usual pace
        IsLiving => "isLiving",
        /// Process ID of the job
        Pid => "pid",
        /// IP address of the machine the job runs on
        Ip => "ip",
        /// Name of the machine the job runs on
        Hostname => "hostname",
        /// User that runs the job
        User => "user",
        /// Identifier of this run: ip:port:startTimestamp
        Id => "id",
        /// Unix timestamp of the job start
        StartTimestamp => "startTimestamp",
        /// Operating system information (sysname, node, release, version, machine)
        Uname => "uname",
        /// The command line the job was started with
        CommandLine => "commandLine",
        /// Argument vector the job was started with
        Argv => "argv",
        /// The command line actually executed (after wrapping)
        ActualCommandLine => "actualCommandLine" (sensitive),
        /// Whether the job runs in parallel
        IsParallel => "isParallel",
        /// Number of processors used by the job
        ProcNr => "procNr",
        /// Name of the solver or job
        JobName => "jobName" (sensitive),
        /// Job id assigned by a queueing system, empty if unset
        JobId => "jobId",
        /// MPI implementation in use, empty if none
        Mpi => "mpi",
        /// Version string of the simulation framework
        FrameworkVersion => "frameworkVersion",
        /// Version of the jobmesh worker library
        MeshVersion => "meshVersion",
        /// Seconds since the last output line was seen
        ElapsedTime => "elapsedTime",
        /// Wall-clock seconds since the job started
        WallTime => "wallTime",
        /// Load averages of the last 1, 5 and 15 minutes
        LoadAverage => "loadAverage",
        /// Resident memory of the job process in MiB
        MemoryUsed => "memoryUsed",
        /// Accumulated CPU usage of the job process in percent of one core
        CpuUsage => "cpuUsage",
        /// Current simulated time (0 if unknown)
        Time => "time",
        /// Simulated time at which the run was created (0 if unknown)
        CreateTime => "createTime",
        /// First simulated time seen in this run (0 if unknown)
        StartTime => "startTime",
        /// Simulated end time if configured (0 if unknown)
        EndTime => "endTime",
        /// Unix timestamp of the last output line
        LastLogLineSeen => "lastLogLineSeen",
        /// Unix timestamp of the last simulated time step
        LastTimeStepSeen => "lastTimeStepSeen",
        /// Number of warnings the job emitted
        NrWarnings => "nrWarnings" (sensitive),
        /// Stop the job gracefully after writing the current state
        Stop => "stop" (sensitive),
        /// Stop the job the next time it writes its state
        StopAtNextWrite => "stopAtNextWrite" (sensitive),
        /// Make the job write its state and continue
        Write => "write" (sensitive),
        /// Kill the job and stop the server
        Kill => "kill" (sensitive),
        /// Stop the server but leave the job running
        KillServer => "killServer" (sensitive),
        /// The last output line of the job
        LastLine => "lastLine" (sensitive),
        /// The buffered recent output lines as one string
        Tail => "tail" (sensitive),
        /// Value of an environment variable, empty if unset
        GetEnviron { name: String } => "getEnviron" (sensitive),
        /// The effective jobmesh configuration
        Configuration => "configuration" (sensitive),
        /// User-defined remark for this job
        GetRemark => "getRemark",
        /// Overwrite the user-defined remark; true if one was set before
        SetRemark { remark: String } => "setRemark" (sensitive),
        /// The current working directory of the job
        Cwd => "cwd" (sensitive),
        /// Path of the job directory
        JobPath => "jobPath" (sensitive),
        /// Names of the files (not directories) in a subdirectory of the job
        ListFiles { directory: String } => "listFiles" (sensitive),
        /// Contents of a text file in the job directory
        GetDictionaryText { directory: String, name: String } => "getDictionaryText" (sensitive),
        /// Overwrite a text file in the job directory
        WriteDictionaryText { directory: String, name: String, text: String } => "writeDictionaryText" (sensitive),
        /// Names of all available methods
        ListMethods => "system.listMethods",
        /// Documentation of one method
        MethodHelp { method: String } => "system.methodHelp",
    }
}

impl WorkerCall {
    /// Build a call from a method name and its JSON parameters
    ///
    /// Used by the CLI and by `forwardCommand` relays.
    pub fn from_parts(
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Self, crate::ProtocolError> {
        let mut call = serde_json::Map::new();
        call.insert("method".into(), serde_json::Value::String(method.into()));
        if let Some(params) = params {
            call.insert("params".into(), params);
        }
        crate::envelope::decode_value(serde_json::Value::Object(call))
    }
}
