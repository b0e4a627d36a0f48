// Repository implementations over PostgreSQL.

pub mod list;
pub mod publication;

pub use list::ListRepository;
pub use publication::PublicationRepository;
