pub mod catalog;
pub mod errors;
pub mod index;
pub mod model;
pub mod store;

pub use catalog::RuleSet;
pub use errors::RuleError;
pub use index::{DomainIndex, host_of};
pub use model::{
    CookiePolicy, DomAction, DomOperation, IpRegion, RefererPolicy, SiteRule, UserAgentPolicy,
};
pub use store::{BaseCatalog, LoadReport, OVERRIDE_FILE_NAME, RuleStore};
