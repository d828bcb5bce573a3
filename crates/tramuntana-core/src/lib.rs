//! Core state, parsing and persistence layer for the tramuntana bridge.
//!
//! Everything in this crate is pure with respect to the outside world: it
//! reads and writes local JSON files, parses transcript lines and pane
//! captures, and tracks flood bans. Talking to Telegram, tmux, git or
//! Postgres is the daemon crate's job.

pub mod callback;
pub mod config;
pub mod flood;
pub mod home;
pub mod io;
pub mod logging;
pub mod monitor_state;
pub mod session_map;
pub mod state;
pub mod terminal;
pub mod text;
pub mod transcript;

pub use config::Config;
pub use state::{State, StateStore, UserThread, WindowState, WorktreeInfo};
