pub mod reverse_ip;
pub mod subdomain;

pub use reverse_ip::{HickoryResolver, HostResolver, ReverseIpLookup};
pub use subdomain::SubdomainEnumerator;
