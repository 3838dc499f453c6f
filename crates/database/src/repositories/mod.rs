pub mod member;
pub mod organization;
pub mod utils;

pub use member::PgMemberRepository;
pub use organization::PgOrganizationRepository;
