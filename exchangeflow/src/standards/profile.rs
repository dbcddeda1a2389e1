use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::collaborators::CatalogQuery;
use crate::model::{DataStandard, Job};

/// Placeholder replaced by the job id in exchange set name templates.
const JOB_ID_PLACEHOLDER: &str = "{jobId}";

/// Behavior that differs between data standards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardProfile {
    data_standard: DataStandard,
    worker_queue: String,
    exchange_set_name_template: String,
}

impl StandardProfile {
    /// The built-in profile for `standard`.
    #[must_use]
    pub fn default_for(standard: DataStandard) -> Self {
        let template = match standard {
            DataStandard::S100 => "S100-ExchangeSet-{jobId}.zip",
            DataStandard::S63 => "S63-ExchangeSet-{jobId}.zip",
            DataStandard::S57 => "S57-ExchangeSet-{jobId}.zip",
        };
        Self {
            data_standard: standard,
            worker_queue: format!("{}-build-requests", standard.slug()),
            exchange_set_name_template: template.to_string(),
        }
    }

    /// Applies configured overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &StandardOverrides) -> Self {
        if let Some(queue) = &overrides.worker_queue {
            self.worker_queue.clone_from(queue);
        }
        if let Some(template) = &overrides.exchange_set_name_template {
            self.exchange_set_name_template.clone_from(template);
        }
        self
    }

    #[must_use]
    pub fn data_standard(&self) -> DataStandard {
        self.data_standard
    }

    /// Queue the standard's builder workers consume.
    #[must_use]
    pub fn worker_queue(&self) -> &str {
        &self.worker_queue
    }

    /// Unexpanded name template passed to workers.
    #[must_use]
    pub fn exchange_set_name_template(&self) -> &str {
        &self.exchange_set_name_template
    }

    /// The template with the job id substituted.
    #[must_use]
    pub fn exchange_set_name(&self, job_id: &str) -> String {
        self.exchange_set_name_template
            .replace(JOB_ID_PLACEHOLDER, job_id)
    }

    /// Builds the catalog change query for `job`.
    ///
    /// Only S-100 forwards the filter expression.
    #[must_use]
    pub fn catalog_query(&self, job: &Job, since: Option<DateTime<Utc>>) -> CatalogQuery {
        let filter = match self.data_standard {
            DataStandard::S100 => job.filter.clone(),
            DataStandard::S63 | DataStandard::S57 => None,
        };
        CatalogQuery {
            data_standard: self.data_standard,
            since,
            product_names: job.products.clone(),
            filter,
        }
    }
}

/// Configurable parts of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardOverrides {
    /// Worker queue name.
    pub worker_queue: Option<String>,
    /// Exchange set name template.
    pub exchange_set_name_template: Option<String>,
}

/// One profile per supported standard.
#[derive(Debug, Clone)]
pub struct StandardRegistry {
    profiles: HashMap<DataStandard, StandardProfile>,
}

impl Default for StandardRegistry {
    fn default() -> Self {
        Self::with_overrides(&HashMap::new())
    }
}

impl StandardRegistry {
    /// Built-in profiles with `overrides` applied.
    #[must_use]
    pub fn with_overrides(overrides: &HashMap<DataStandard, StandardOverrides>) -> Self {
        let profiles = DataStandard::ALL
            .into_iter()
            .map(|standard| {
                let profile = StandardProfile::default_for(standard);
                let profile = match overrides.get(&standard) {
                    Some(o) => profile.with_overrides(o),
                    None => profile,
                };
                (standard, profile)
            })
            .collect();
        Self { profiles }
    }

    /// The profile for `standard`.
    #[must_use]
    pub fn get(&self, standard: DataStandard) -> &StandardProfile {
        // Every standard is populated at construction.
        &self.profiles[&standard]
    }

    /// Every profile, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &StandardProfile> {
        self.profiles.values()
    }
}
