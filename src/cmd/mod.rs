//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled      |
//! |-----------|-----------------------|
//! | `run`     | `Run`, `Phase`        |
//! | `inspect` | `Status`, `Metrics`   |
//! | `clean`   | `Clean`               |

pub mod clean;
pub mod inspect;
pub mod run;

pub use clean::cmd_clean;
pub use inspect::{cmd_metrics, cmd_status};
pub use run::{cmd_phase, cmd_run};
