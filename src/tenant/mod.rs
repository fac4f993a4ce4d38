/// Tenant-aware name resolution.
///
/// Maps caller-visible graph and key names onto physically isolated,
/// tenant-prefixed names in the shared backend, and back.
mod resolver;

pub use resolver::{ExtractedName, TenantResolver, SEPARATOR};
