//! Simulation events exchanged between the engine and datacenters.

// RESOURCE DISCOVERY EVENTS ///////////////////////////////////////////////////////////////////////

pub mod discovery {
    use serde::Serialize;

    use crate::cloud::DatacenterCharacteristics;

    #[derive(Serialize)]
    pub struct ResourceCharacteristicsRequest {}

    #[derive(Serialize)]
    pub struct ResourceCharacteristics {
        pub characteristics: DatacenterCharacteristics,
    }
}

// REQUEST LIFECYCLE EVENTS ////////////////////////////////////////////////////////////////////////

pub mod request {
    use serde::Serialize;

    #[derive(Serialize)]
    pub struct BeginRequest {
        pub request_id: u32,
    }

    #[derive(Serialize)]
    pub struct EndOfSimulation {}
}

// VM LIFECYCLE EVENTS /////////////////////////////////////////////////////////////////////////////

pub mod vm {
    use serde::Serialize;

    use crate::vm::VmInstance;

    #[derive(Serialize)]
    pub struct VmCreateRequest {
        pub vm: VmInstance,
        pub request_id: u32,
    }

    #[derive(Serialize)]
    pub struct VmCreateAck {
        pub datacenter_id: u32,
        pub vm_id: u32,
        pub success: bool,
    }

    #[derive(Serialize)]
    pub struct VmDestroyRequest {
        pub vm_id: u32,
    }
}

// TASK EXECUTION EVENTS ///////////////////////////////////////////////////////////////////////////

pub mod task {
    use serde::Serialize;

    use crate::task::Task;

    #[derive(Serialize)]
    pub struct TaskSubmit {
        pub task: Task,
    }

    #[derive(Serialize)]
    pub struct TaskReturn {
        pub task: Task,
    }

    /// Internal datacenter event marking the end of a task execution.
    #[derive(Serialize)]
    pub struct TaskCompleted {
        pub vm_id: u32,
    }
}
