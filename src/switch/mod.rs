//! Single-stream camera switching: restart the target camera's analyzer, then poll until the
//! backend reports it active, the wall-clock bound runs out, or a newer request supersedes it.

pub mod controller;
pub mod machine;

pub use self::controller::{CameraSwitchController, SwitchSettings};
pub use self::machine::{Badge, Effect, RequestState, SessionView, SwitchEvent, SwitchMachine, SwitchPhase, SwitchRequest};
