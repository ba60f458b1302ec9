//! Maps classifications to departments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use reviewsignal_common::config::{default_departments, default_mappings, DepartmentMapping, RouterConfig};
use reviewsignal_common::{AnalysisResult, Department, IntentCategory};

/// Immutable view of departments and mappings. Replaced wholesale on every
/// mutation so a route call never sees a half-applied change.
#[derive(Debug, Clone, Default)]
struct RoutingTable {
    departments: HashMap<String, Department>,
    mappings: HashMap<IntentCategory, String>,
    default_department: Option<String>,
}

impl RoutingTable {
    fn mapped(&self, category: IntentCategory) -> Option<&Department> {
        self.mappings
            .get(&category)
            .and_then(|id| self.departments.get(id))
    }
}

pub struct DepartmentRouter {
    table: RwLock<Arc<RoutingTable>>,
}

impl DepartmentRouter {
    /// Falls back to the built-in catalogue when the configuration names no
    /// departments, and to the built-in mappings when it names no mappings.
    pub fn from_config(config: &RouterConfig) -> Self {
        let departments = if config.departments.is_empty() {
            default_departments()
        } else {
            config.departments.clone()
        };
        let mappings = if config.mappings.is_empty() {
            default_mappings()
        } else {
            config.mappings.clone()
        };

        let mut table = RoutingTable::default();
        for dept in departments {
            table.departments.insert(dept.id.clone(), dept);
        }

        // Lowest priority first so the highest-priority mapping is written last.
        let mut ordered: Vec<&DepartmentMapping> = mappings.iter().collect();
        ordered.sort_by_key(|m| m.priority);
        for mapping in ordered {
            if !table.departments.contains_key(&mapping.department) {
                warn!(
                    category = %mapping.category,
                    department = mapping.department.as_str(),
                    "Mapping names an unknown department"
                );
            }
            table
                .mappings
                .insert(mapping.category, mapping.department.clone());
        }

        if !config.default_department.is_empty() {
            table.default_department = Some(config.default_department.clone());
        }

        info!(
            departments = table.departments.len(),
            mappings = table.mappings.len(),
            "Router ready"
        );
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.read().expect("routing table lock poisoned").clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut RoutingTable)) {
        let mut guard = self.table.write().expect("routing table lock poisoned");
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Never fails. Order: direct mapping, highest-scoring mapped category,
    /// configured default, then the terminal support department.
    pub fn route(&self, analysis: &AnalysisResult) -> Department {
        let table = self.snapshot();

        if let Some(dept) = table.mapped(analysis.intent_category) {
            return dept.clone();
        }

        let mut ranked: Vec<(&IntentCategory, &f64)> = analysis.category_scores.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1));
        for (category, _) in ranked {
            if let Some(dept) = table.mapped(*category) {
                debug!(review_id = analysis.review_id.as_str(), category = %category, "Routed by category score");
                return dept.clone();
            }
        }

        if let Some(dept) = table
            .default_department
            .as_ref()
            .and_then(|id| table.departments.get(id))
        {
            return dept.clone();
        }

        if let Some(dept) = table.departments.get(Department::TERMINAL_ID) {
            return dept.clone();
        }

        Department::terminal()
    }

    /// Register or replace a department and map each of its categories to it.
    pub fn add_department(&self, department: Department) {
        info!(department = department.id.as_str(), "Adding department");
        self.mutate(|table| {
            for category in &department.categories {
                table.mappings.insert(*category, department.id.clone());
            }
            table.departments.insert(department.id.clone(), department);
        });
    }

    pub fn update_mapping(&self, category: IntentCategory, department_id: impl Into<String>) {
        let department_id = department_id.into();
        info!(category = %category, department = department_id.as_str(), "Updating mapping");
        self.mutate(|table| {
            table.mappings.insert(category, department_id);
        });
    }

    pub fn department(&self, id: &str) -> Option<Department> {
        self.snapshot().departments.get(id).cloned()
    }

    /// All departments, sorted by id.
    pub fn departments(&self) -> Vec<Department> {
        let mut all: Vec<Department> = self.snapshot().departments.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use reviewsignal_common::{RawAnalysis, Thresholds};

    fn analysis(category: IntentCategory, scores: &[(IntentCategory, f64)]) -> AnalysisResult {
        AnalysisResult::from_raw(
            "r-1",
            RawAnalysis {
                sentiment_score: -0.8,
                intent_category: category,
                confidence: 0.9,
                keywords: BTreeSet::new(),
                entities: Vec::new(),
                category_scores: scores.iter().copied().collect::<BTreeMap<_, _>>(),
            },
            &Thresholds::default(),
        )
    }

    fn dept(id: &str, categories: Vec<IntentCategory>) -> Department {
        Department {
            id: id.to_string(),
            name: id.to_uppercase(),
            contact_info: format!("{id}@company.com"),
            categories,
        }
    }

    fn sparse_router() -> DepartmentRouter {
        DepartmentRouter::from_config(&RouterConfig {
            departments: vec![dept("security", vec![]), dept("finance", vec![])],
            mappings: vec![
                DepartmentMapping {
                    category: IntentCategory::Security,
                    department: "security".to_string(),
                    priority: 1,
                },
                DepartmentMapping {
                    category: IntentCategory::Billing,
                    department: "finance".to_string(),
                    priority: 1,
                },
            ],
            default_department: String::new(),
        })
    }

    #[test]
    fn security_maps_directly() {
        let router = DepartmentRouter::from_config(&RouterConfig::default());
        let d = router.route(&analysis(IntentCategory::Security, &[]));
        assert_eq!(d.id, "security");
    }

    #[test]
    fn unmapped_category_falls_back_to_best_scoring_mapped_category() {
        let router = sparse_router();
        let d = router.route(&analysis(
            IntentCategory::Logistics,
            &[
                (IntentCategory::Logistics, 0.6),
                (IntentCategory::Billing, 0.3),
                (IntentCategory::Security, 0.1),
            ],
        ));
        assert_eq!(d.id, "finance");
    }

    #[test]
    fn nothing_mapped_ends_at_terminal_department() {
        let router = sparse_router();
        let d = router.route(&analysis(IntentCategory::UiUx, &[(IntentCategory::UiUx, 1.0)]));
        assert_eq!(d, Department::terminal());
    }

    #[test]
    fn configured_default_beats_terminal() {
        let router = DepartmentRouter::from_config(&RouterConfig {
            departments: vec![dept("triage", vec![])],
            mappings: vec![DepartmentMapping {
                category: IntentCategory::Security,
                department: "triage".to_string(),
                priority: 0,
            }],
            default_department: "triage".to_string(),
        });
        let d = router.route(&analysis(IntentCategory::Billing, &[]));
        assert_eq!(d.id, "triage");
    }

    #[test]
    fn route_is_total_over_every_category() {
        let router = sparse_router();
        for category in IntentCategory::ALL {
            let d = router.route(&analysis(category, &[(category, 1.0)]));
            assert!(!d.id.is_empty());
        }
    }

    #[test]
    fn highest_priority_mapping_wins() {
        let router = DepartmentRouter::from_config(&RouterConfig {
            departments: vec![dept("engineering", vec![]), dept("sre", vec![])],
            mappings: vec![
                DepartmentMapping {
                    category: IntentCategory::Performance,
                    department: "sre".to_string(),
                    priority: 9,
                },
                DepartmentMapping {
                    category: IntentCategory::Performance,
                    department: "engineering".to_string(),
                    priority: 2,
                },
            ],
            default_department: String::new(),
        });
        assert_eq!(router.route(&analysis(IntentCategory::Performance, &[])).id, "sre");
    }

    #[test]
    fn added_department_takes_over_its_categories() {
        let router = sparse_router();
        router.add_department(dept("ux", vec![IntentCategory::UiUx]));
        assert_eq!(router.route(&analysis(IntentCategory::UiUx, &[])).id, "ux");
        assert!(router.department("ux").is_some());

        router.update_mapping(IntentCategory::UiUx, "security");
        assert_eq!(router.route(&analysis(IntentCategory::UiUx, &[])).id, "security");
    }

    #[test]
    fn mapping_to_missing_department_is_skipped() {
        let router = sparse_router();
        router.update_mapping(IntentCategory::Billing, "ghost");
        let d = router.route(&analysis(
            IntentCategory::Billing,
            &[(IntentCategory::Billing, 0.7), (IntentCategory::Security, 0.3)],
        ));
        assert_eq!(d.id, "security");
    }

    #[test]
    fn routing_during_concurrent_mutation_always_succeeds() {
        let router = Arc::new(sparse_router());
        let writer = {
            let router = router.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    router.add_department(dept(&format!("d{i}"), vec![IntentCategory::Logistics]));
                }
            })
        };
        for _ in 0..200 {
            let d = router.route(&analysis(IntentCategory::Logistics, &[]));
            assert!(d.id.starts_with('d') || d.id == "support");
        }
        writer.join().unwrap();
        assert_eq!(router.route(&analysis(IntentCategory::Logistics, &[])).id, "d199");
    }
}
