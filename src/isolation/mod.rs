//! Per-workflow isolation: dedicated network ports and git worktrees.
//!
//! Concurrent workflows share only the port space and the `trees/`
//! filesystem namespace. Both are protected by an allocate-then-validate
//! discipline rather than locks: a run re-verifies its recorded
//! environment at startup and re-allocates when anything went stale.

pub mod ports;
pub mod worktree;

pub use ports::{
    BACKEND_PORT_BASE, FRONTEND_PORT_BASE, PORT_SLOTS, find_next_available_ports,
    is_port_available, ports_for_workflow,
};
pub use worktree::{
    create_worktree, remove_worktree, setup_worktree_environment, validate_worktree,
};
