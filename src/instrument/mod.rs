//! Device drivers for the apparatus boards.
//!
//! Both board drivers follow one contract: a command is never assumed to have
//! succeeded, and a module's power state is only ever set from a freshly
//! parsed response to that exact command.

pub mod outlet_box;
pub mod radiometer;
pub mod switch_board;

pub use outlet_box::OutletBox;
pub use radiometer::RadiometerDevice;
pub use switch_board::SwitchBoard;
