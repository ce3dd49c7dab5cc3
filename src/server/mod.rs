pub mod background;
pub mod guards;
pub mod router;
pub mod routes;

pub use background::BackgroundTasks;
pub use router::{CastorState, castor_router};
