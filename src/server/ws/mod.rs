//! WebSocket surfaces: the connection/topic manager, the realtime frame
//! analyzer, and the job progress channel.

pub mod jobs;
pub mod manager;
pub mod stream;
