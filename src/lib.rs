//! Autopilot: an autonomous run loop that drives a coding agent through a
//! sprint of tasks inside a sandboxed repository checkout.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `models`     | Runs, sprints, tasks, settings; wire-format types       |
//! | `errors`     | Typed errors per subsystem                              |
//! | `client`     | HTTP backend client, the sole persistence boundary      |
//! | `logsink`    | Buffered streaming of agent output to the backend       |
//! | `agent`      | Agent adapters: streaming CLI and plain subprocess      |
//! | `supervisor` | The iteration loop: select task, invoke agent, persist  |
//! | `launch`     | Run creation, detached supervisor spawn, cancel, retry  |

pub mod agent;
pub mod client;
pub mod errors;
pub mod launch;
pub mod logsink;
pub mod models;
pub mod supervisor;
