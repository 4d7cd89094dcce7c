pub mod mysql_session;
pub mod pg_session;

pub use mysql_session::MySqlSession;
pub use pg_session::{OrdinarySession, SessionPurpose};
