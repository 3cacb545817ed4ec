use log::{debug, warn};
use std::collections::HashSet;
use url::Url;

use crate::http::{Target, TargetKind};

/// Which follow-up targets a harvest feeds back into the fetch loop after
/// each round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowConfig {
    /// Hops of link discovery from a seed page; 0 turns it off.
    pub max_depth: usize,
    /// A discovered link must contain one of these; empty accepts any.
    pub link_patterns: Vec<String>,
    /// Only follow links on the host of the page they were found on.
    pub same_host: bool,
    /// Fetch a listing's profile page when its card has no phone.
    pub profiles: bool,
    /// Upper bound on follow-up targets for one run.
    pub max_follow_ups: usize,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            max_depth: 0,
            link_patterns: Vec::new(),
            same_host: false,
            profiles: false,
            max_follow_ups: 500,
        }
    }
}

impl FollowConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_depth > 0 || self.profiles
    }
}

/// Visited set for one run. Every URL is fetched at most once, seeds
/// included.
pub(crate) struct Frontier {
    config: FollowConfig,
    visited: HashSet<String>,
    admitted: usize,
    limit_logged: bool,
}

fn visit_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

impl Frontier {
    pub fn new(config: FollowConfig, seeds: &[Target]) -> Self {
        let visited = seeds
            .iter()
            .filter(|t| t.kind() == TargetKind::Url)
            .map(|t| match t.parse_url() {
                Ok(url) => visit_key(&url),
                Err(_) => t.value().to_string(),
            })
            .collect();
        Self {
            config,
            visited,
            admitted: 0,
            limit_logged: false,
        }
    }

    pub fn config(&self) -> &FollowConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn admitted(&self) -> usize {
        self.admitted
    }

    fn admit(&mut self, url: &Url) -> Option<Target> {
        if self.admitted >= self.config.max_follow_ups {
            if !self.limit_logged {
                warn!(
                    "Follow-up limit of {} reached, ignoring further links",
                    self.config.max_follow_ups
                );
                self.limit_logged = true;
            }
            return None;
        }
        let key = visit_key(url);
        if !self.visited.insert(key.clone()) {
            return None;
        }
        self.admitted += 1;
        Some(Target::url(key))
    }

    /// A link found on `page` at `depth`, if it passes the filters and was
    /// never seen before.
    pub fn admit_link(&mut self, link: &Url, page: &Url, depth: usize) -> Option<Target> {
        if depth >= self.config.max_depth {
            return None;
        }
        if self.config.same_host && link.host_str() != page.host_str() {
            return None;
        }
        let patterns = &self.config.link_patterns;
        if !patterns.is_empty() && !patterns.iter().any(|p| link.as_str().contains(p.as_str())) {
            return None;
        }
        let target = self.admit(link)?;
        debug!("Following {} from {} (depth {})", target, page, depth + 1);
        Some(target)
    }

    pub fn admit_profile(&mut self, profile_url: &str) -> Option<Target> {
        let url = Url::parse(profile_url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        self.admit(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn frontier(config: FollowConfig) -> Frontier {
        Frontier::new(
            config,
            &[Target::url("https://www.myguidemacedonia.com/wellness/hotel-sirius")],
        )
    }

    #[test]
    fn test_links_are_filtered_and_visited_once() {
        let mut frontier = frontier(FollowConfig {
            max_depth: 2,
            link_patterns: vec!["wellness".to_string()],
            ..FollowConfig::default()
        });
        let page = url("https://www.myguidemacedonia.com/wellness/hotel-sirius");

        let spa = url("https://www.myguidemacedonia.com/wellness/studio-sense");
        assert_eq!(
            frontier.admit_link(&spa, &page, 0),
            Some(Target::url("https://www.myguidemacedonia.com/wellness/studio-sense"))
        );
        let again = url("https://www.myguidemacedonia.com/wellness/studio-sense#map");
        assert_eq!(frontier.admit_link(&again, &page, 1), None);

        let seed = url("https://www.myguidemacedonia.com/wellness/hotel-sirius");
        assert_eq!(frontier.admit_link(&seed, &page, 0), None);

        let off_topic = url("https://www.myguidemacedonia.com/hotels/sirius");
        assert_eq!(frontier.admit_link(&off_topic, &page, 0), None);

        let too_deep = url("https://www.myguidemacedonia.com/wellness/tana-cosmetic");
        assert_eq!(frontier.admit_link(&too_deep, &page, 2), None);
        assert_eq!(frontier.admitted(), 1);
    }

    #[test]
    fn test_same_host_and_limit() {
        let mut frontier = frontier(FollowConfig {
            max_depth: 1,
            same_host: true,
            max_follow_ups: 1,
            ..FollowConfig::default()
        });
        let page = url("https://www.myguidemacedonia.com/wellness/hotel-sirius");

        let elsewhere = url("https://swam.mk/about-swam/");
        assert_eq!(frontier.admit_link(&elsewhere, &page, 0), None);

        let first = url("https://www.myguidemacedonia.com/wellness/a");
        let second = url("https://www.myguidemacedonia.com/wellness/b");
        assert!(frontier.admit_link(&first, &page, 0).is_some());
        assert_eq!(frontier.admit_link(&second, &page, 0), None);
        assert_eq!(frontier.admit_profile("https://zk.mk/en/smile"), None);
    }

    #[test]
    fn test_profiles_share_the_visited_set() {
        let mut frontier = frontier(FollowConfig {
            profiles: true,
            ..FollowConfig::default()
        });
        assert_eq!(
            frontier.admit_profile("https://zk.mk/en/smile"),
            Some(Target::url("https://zk.mk/en/smile"))
        );
        assert_eq!(frontier.admit_profile("https://zk.mk/en/smile"), None);
        assert_eq!(frontier.admit_profile("not a url"), None);
        assert_eq!(frontier.admit_profile("mailto:info@smile.mk"), None);
    }
}
