//! MeshChat Harness
//!
//! Transports for exercising the MeshChat runtime without radios: an in-process
//! local mesh shared by several nodes, and a recording transport that logs every
//! call the core makes.

pub mod local_mesh;
pub mod recording;

pub use local_mesh::{LocalMesh, LocalMeshTransport};
pub use recording::{FailurePlan, RecordingHandle, RecordingTransport, TransportCall};
