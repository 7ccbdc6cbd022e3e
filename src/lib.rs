mod constraint;
mod dense;
mod dss;
mod eng;
mod error;
mod init;
mod jac;
mod math;
mod model;
mod newton;
mod opf;
mod opt;
mod result;
mod solution;
mod transform;
mod ybus;
mod zip;

pub mod debug;
pub mod traits;


pub use constraint::*;
pub use dense::*;
pub use dss::*;
pub use eng::*;
pub use error::*;
pub use init::*;
pub use jac::*;
pub use math::*;
pub use model::*;
pub use newton::*;
pub use opf::*;
pub use opt::*;
pub use result::*;
pub use solution::*;
pub use transform::*;
pub use ybus::*;
