//! One module per subcommand.

pub mod cgi;
pub mod check;
pub mod serve;
pub mod status;
pub mod sync;
pub mod trigger;
