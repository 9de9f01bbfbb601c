//! Container image freshness cache.
//!
//! Groups the deployed tags of every pod by image repository, lists each
//! repository's tags once, and records the highest tag sharing the deployed
//! tag's variant. Results are written per repository as they complete, so a
//! reader mid-check sees finished entries immediately.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use crate::models::{ImageRef, PodImageInfo};
use crate::versions::gate::CheckGate;
use crate::versions::registry::{RegistryClient, RegistryError, skip_registry};
use crate::versions::semver::highest_matching_tag;

/// Minimum wall-clock time between completed checks.
const CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Delay between per-repository queries; shorter spacing trips upstream
/// rate limits.
const PACING: Duration = Duration::from_secs(2);

pub struct ImageChecker {
    /// `"image|deployedTag"` to latest tag with the same variant.
    latest: RwLock<HashMap<String, String>>,
    gate: CheckGate,
    registry: RegistryClient,
}

struct RepoGroup {
    registry: String,
    path: String,
    tags: BTreeSet<String>,
}

impl ImageChecker {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            gate: CheckGate::new(),
            registry: RegistryClient::new(Duration::from_secs(15)),
        }
    }

    /// Cached latest tag for an image + deployed tag combination.
    pub fn latest(&self, image: &str, tag: &str) -> Option<String> {
        self.latest
            .read()
            .expect("image cache")
            .get(&format!("{image}|{tag}"))
            .cloned()
    }

    /// Fetch latest tags for all unique image repositories used by pods.
    /// Single-flight; skipped entirely when the last completed check is less
    /// than fifteen minutes old.
    pub async fn check(&self, pods: &[PodImageInfo]) {
        let Some(permit) = self.gate.try_begin(CHECK_INTERVAL) else {
            return;
        };

        let mut repos: BTreeMap<String, RepoGroup> = BTreeMap::new();
        for pod in pods {
            let image_ref = ImageRef::parse(&pod.image);
            let image = image_ref.image();
            repos
                .entry(image)
                .or_insert_with(|| RepoGroup {
                    registry: image_ref.registry.clone(),
                    path: image_ref.repository.clone(),
                    tags: BTreeSet::new(),
                })
                .tags
                .insert(image_ref.tag);
        }

        let mut skip_hosts: HashSet<String> = HashSet::new();
        let mut checked = 0usize;
        let mut resolved = 0usize;

        for (image, group) in &repos {
            if skip_registry(&group.registry) || skip_hosts.contains(&group.registry) {
                self.set_sentinel(image, &group.tags);
                checked += 1;
                continue;
            }

            let all_tags = match self.registry.list_tags(&group.registry, &group.path).await {
                Ok(tags) => tags,
                Err(RegistryError::RateLimited) => {
                    tracing::warn!(
                        registry = group.registry,
                        "image check: rate limited, skipping registry"
                    );
                    skip_hosts.insert(group.registry.clone());
                    self.set_sentinel(image, &group.tags);
                    checked += 1;
                    tokio::time::sleep(PACING).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(image, error = %err, "image check: failed to list tags");
                    self.set_sentinel(image, &group.tags);
                    checked += 1;
                    tokio::time::sleep(PACING).await;
                    continue;
                }
            };

            // Results become visible per repository, not at the end of the
            // whole sweep.
            {
                let mut latest = self.latest.write().expect("image cache");
                for tag in &group.tags {
                    latest.insert(
                        format!("{image}|{tag}"),
                        highest_matching_tag(tag, &all_tags),
                    );
                }
            }

            checked += 1;
            resolved += 1;
            tokio::time::sleep(PACING).await;
        }

        permit.complete();
        tracing::info!(repos = checked, resolved, "image check complete");
    }

    fn set_sentinel(&self, image: &str, tags: &BTreeSet<String>) {
        let mut latest = self.latest.write().expect("image cache");
        for tag in tags {
            latest.insert(format!("{image}|{tag}"), "-".to_string());
        }
    }
}

impl Default for ImageChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(image: &str) -> PodImageInfo {
        PodImageInfo {
            namespace: "apps".into(),
            pod_name: "p".into(),
            container: "c".into(),
            image: image.into(),
            image_id: String::new(),
            init_container: false,
        }
    }

    #[tokio::test]
    async fn test_local_registries_get_sentinel() {
        let checker = ImageChecker::new();
        checker
            .check(&[
                pod("registry.apps.svc.cluster.local/app:1.0.0"),
                pod("localhost:5000/tool:2.1.0"),
            ])
            .await;

        assert_eq!(
            checker
                .latest("registry.apps.svc.cluster.local/app", "1.0.0")
                .as_deref(),
            Some("-")
        );
        assert_eq!(
            checker.latest("localhost:5000/tool", "2.1.0").as_deref(),
            Some("-")
        );
    }

    #[tokio::test]
    async fn test_interval_gate_skips_second_run() {
        let checker = ImageChecker::new();
        checker.check(&[pod("localhost:5000/tool:2.1.0")]).await;

        // Overwrite the cached value, then re-check: the gate must skip the
        // run and leave the marker in place.
        checker
            .latest
            .write()
            .unwrap()
            .insert("localhost:5000/tool|2.1.0".into(), "marker".into());
        checker.check(&[pod("localhost:5000/tool:2.1.0")]).await;

        assert_eq!(
            checker.latest("localhost:5000/tool", "2.1.0").as_deref(),
            Some("marker")
        );
    }

    #[test]
    fn test_unknown_lookup_is_none() {
        let checker = ImageChecker::new();
        assert!(checker.latest("ghcr.io/foo/bar", "1.0.0").is_none());
    }
}
