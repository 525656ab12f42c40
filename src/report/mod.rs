//! Length-framed TCP protocol through which runtime hosts push container and
//! image state to the controller.
//!
//! Each frame is a big-endian `u16` length followed by a `<data> <command>`
//! payload. The controller answers every frame with one byte: `1` when the
//! report was applied, `0` otherwise.

pub mod client;
pub mod command;
pub mod frame;
pub mod handler;
pub mod server;

pub use client::ReportClient;
pub use command::ReportCommand;
pub use frame::{encode_frame, read_frame, write_frame, ACK_FAILED, ACK_OK};
pub use handler::ReportHandler;
pub use server::{serve_connection, ReportServer};
