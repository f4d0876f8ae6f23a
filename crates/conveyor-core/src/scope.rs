//! Scope and pair types, shared by the Admission Controller (C7), the Run
//! Coordinator (C6), and the Cron Dispatcher (C8) — all three need the same
//! notion of "what does this run touch" to agree on overlap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A `(brand, purchaser)` tuple — the unit of admission and scheduling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub tenant: String,
    pub purchaser: String,
}

/// The scope a run or schedule touches. `tenant` without `purchaser` means
/// "every purchaser under this tenant"; no tenant and no pairs means global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub purchaser: Option<String>,
    #[serde(default)]
    pub pairs: Vec<Pair>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<Pair>) -> Self {
        Self {
            tenant: None,
            purchaser: None,
            pairs,
        }
    }

    pub fn from_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            purchaser: None,
            pairs: Vec::new(),
        }
    }

    pub fn from_tenant_purchaser(tenant: impl Into<String>, purchaser: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            purchaser: Some(purchaser.into()),
            pairs: Vec::new(),
        }
    }

    /// A scope with no tenant and no pairs is global (spec.md §4.5).
    pub fn is_global(&self) -> bool {
        self.tenant.is_none() && self.pairs.is_empty()
    }

    /// `P(scope)` — the concrete pair set this scope expands to, given a
    /// `brand -> purchasers[]` map for tenant-only scopes. Returns `None`
    /// when the scope is tenant-only and the map has no entry (can't be
    /// expanded into concrete pairs, but overlap is still decided by the
    /// tenant-equality rule in `overlaps`).
    pub fn pair_set(&self, brand_purchasers: &dyn Fn(&str) -> Vec<String>) -> BTreeSet<Pair> {
        if !self.pairs.is_empty() {
            return self.pairs.iter().cloned().collect();
        }
        match (&self.tenant, &self.purchaser) {
            (Some(t), Some(p)) => {
                let mut s = BTreeSet::new();
                s.insert(Pair {
                    tenant: t.clone(),
                    purchaser: p.clone(),
                });
                s
            }
            (Some(t), None) => brand_purchasers(t)
                .into_iter()
                .map(|p| Pair {
                    tenant: t.clone(),
                    purchaser: p,
                })
                .collect(),
            (None, _) => BTreeSet::new(),
        }
    }

    /// Two scopes overlap iff either is global, or their pair sets
    /// intersect, or (both have tenant set, tenants equal, and either lacks
    /// a purchaser or purchasers equal) — spec.md §4.5.
    pub fn overlaps(&self, other: &Scope) -> bool {
        if self.is_global() || other.is_global() {
            return true;
        }

        if !self.pairs.is_empty() || !other.pairs.is_empty() {
            let a: BTreeSet<&Pair> = self.pairs.iter().collect();
            let b: BTreeSet<&Pair> = other.pairs.iter().collect();
            if a.intersection(&b).next().is_some() {
                return true;
            }
        }

        if let (Some(ta), Some(tb)) = (&self.tenant, &other.tenant) {
            if ta == tb {
                match (&self.purchaser, &other.purchaser) {
                    (None, _) | (_, None) => return true,
                    (Some(pa), Some(pb)) => {
                        if pa == pb {
                            return true;
                        }
                    }
                }
            }
        }

        // A tenant-only scope vs. a pair-listed scope: overlap iff any pair
        // in the other scope names this tenant.
        if let Some(ta) = &self.tenant {
            if self.purchaser.is_none() && self.pairs.is_empty() {
                if other.pairs.iter().any(|p| &p.tenant == ta) {
                    return true;
                }
            }
        }
        if let Some(tb) = &other.tenant {
            if other.purchaser.is_none() && other.pairs.is_empty() {
                if self.pairs.iter().any(|p| &p.tenant == tb) {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_overlaps_everything() {
        assert!(Scope::new().overlaps(&Scope::from_tenant("acme")));
        assert!(Scope::from_tenant("acme").overlaps(&Scope::new()));
    }

    #[test]
    fn disjoint_pairs_do_not_overlap() {
        let a = Scope::from_pairs(vec![Pair {
            tenant: "acme".into(),
            purchaser: "p1".into(),
        }]);
        let b = Scope::from_pairs(vec![Pair {
            tenant: "acme".into(),
            purchaser: "p2".into(),
        }]);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn shared_pair_overlaps() {
        let a = Scope::from_pairs(vec![Pair {
            tenant: "acme".into(),
            purchaser: "p1".into(),
        }]);
        let b = Scope::from_pairs(vec![Pair {
            tenant: "acme".into(),
            purchaser: "p1".into(),
        }]);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn same_tenant_no_purchaser_overlaps() {
        let a = Scope::from_tenant("acme");
        let b = Scope::from_tenant_purchaser("acme", "p1");
        assert!(a.overlaps(&b));
    }

    #[test]
    fn same_tenant_different_purchaser_no_overlap() {
        let a = Scope::from_tenant_purchaser("acme", "p1");
        let b = Scope::from_tenant_purchaser("acme", "p2");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn different_tenant_no_overlap() {
        let a = Scope::from_tenant("acme");
        let b = Scope::from_tenant("other");
        assert!(!a.overlaps(&b));
    }
}
