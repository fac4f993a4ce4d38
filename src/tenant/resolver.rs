use crate::config::TenancyConfig;

/// Character placed between a tenant identifier and a logical name.
pub const SEPARATOR: char = '_';

/// A physical name split back into its tenant and logical parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedName {
    pub tenant_id: String,
    pub original_graph_name: String,
}

/// Computes physical backend names from logical names and tenant identity.
///
/// Resolution is a pure function of the logical name, the caller's tenant
/// and the two feature flags. With either flag off, or with no tenant,
/// every operation degrades to the identity so single-tenant deployments
/// see their names unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantResolver {
    multi_tenancy: bool,
    prefixing: bool,
}

impl TenantResolver {
    pub fn new(multi_tenancy: bool, prefixing: bool) -> Self {
        Self {
            multi_tenancy,
            prefixing,
        }
    }

    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(config.multi_tenancy, config.prefix_graph_names)
    }

    /// Returns `true` when names are actually rewritten per tenant.
    pub fn is_active(&self) -> bool {
        self.multi_tenancy && self.prefixing
    }

    /// Resolves a logical name to the physical name used against the backend.
    ///
    /// An empty tenant string is still a tenant: it yields `"_name"`.
    pub fn resolve(&self, logical_name: &str, tenant_id: Option<&str>) -> String {
        match tenant_id {
            Some(tenant) if self.is_active() => {
                format!("{tenant}{SEPARATOR}{logical_name}")
            }
            _ => logical_name.to_string(),
        }
    }

    /// Splits a physical name at the first separator.
    ///
    /// Returns `None` when prefixing is inactive or the name carries no
    /// separator. Any further separators stay in the logical part.
    pub fn extract(&self, physical_name: &str) -> Option<ExtractedName> {
        if !self.is_active() {
            return None;
        }
        let (tenant, rest) = physical_name.split_once(SEPARATOR)?;
        Some(ExtractedName {
            tenant_id: tenant.to_string(),
            original_graph_name: rest.to_string(),
        })
    }

    /// Narrows a backend listing to what the given tenant may see.
    ///
    /// - inactive: every name, order preserved
    /// - no tenant: only names without a separator (shared names)
    /// - tenant: only names under `tenant_`, with the prefix stripped
    pub fn filter_for_tenant(&self, all_names: &[String], tenant_id: Option<&str>) -> Vec<String> {
        if !self.is_active() {
            return all_names.to_vec();
        }

        match tenant_id {
            None => all_names
                .iter()
                .filter(|name| !name.contains(SEPARATOR))
                .cloned()
                .collect(),
            Some(tenant) => {
                let prefix = format!("{tenant}{SEPARATOR}");
                all_names
                    .iter()
                    .filter_map(|name| name.strip_prefix(prefix.as_str()))
                    .map(str::to_string)
                    .collect()
            }
        }
    }

    /// Returns `true` if the resolved name for this caller exists in `all_names`.
    pub fn validate_access(
        &self,
        logical_name: &str,
        tenant_id: Option<&str>,
        all_names: &[String],
    ) -> bool {
        let physical = self.resolve(logical_name, tenant_id);
        all_names.iter().any(|name| *name == physical)
    }
}
