use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::*;
use regex::Regex;

use crate::error::{Error, Result};
use crate::mods::{ModId, run_as};

/// Given the original path of a resource the game is loading, returns the path
/// of a replacement or `None` to leave it alone.
pub type ResourceProvider = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
struct Interception {
    owner: ModId,
    provider: ResourceProvider,
}

#[derive(Clone)]
struct PatternInterception {
    pattern: String,
    regex: Regex,
    interception: Interception,
}

/// Returns the final component of `path`, accepting either separator.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Compiles a `*`/`?` wildcard into a case-insensitive regex anchored at both
/// ends.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| Error::Pattern(e.to_string()))
}

/// Redirects game resource loads to files supplied by mods.
///
/// Providers registered for an exact file name are asked first, then wildcard
/// providers in the order they were registered. The first provider to return
/// a path wins.
#[derive(Default)]
pub struct ResourceInterceptor {
    exact: RwLock<HashMap<String, Vec<Interception>>>,
    patterns: RwLock<Vec<PatternInterception>>,
}

impl ResourceInterceptor {
    pub fn new() -> Self {
        Default::default()
    }

    /// Intercepts loads of the file named `filename` (case-insensitive).
    pub fn intercept(&self, owner: ModId, filename: &str, provider: ResourceProvider) {
        let key = file_name(filename).to_ascii_lowercase();
        debug!("{owner} intercepting {key}");
        if let Ok(mut exact) = self.exact.write() {
            exact
                .entry(key)
                .or_default()
                .push(Interception { owner, provider });
        }
    }

    /// Intercepts loads of every file whose name matches the wildcard
    /// `pattern`.
    pub fn intercept_pattern(
        &self,
        owner: ModId,
        pattern: &str,
        provider: ResourceProvider,
    ) -> Result<()> {
        let regex = wildcard_regex(pattern)?;
        debug!("{owner} intercepting pattern {pattern}");
        if let Ok(mut patterns) = self.patterns.write() {
            patterns.push(PatternInterception {
                pattern: pattern.to_string(),
                regex,
                interception: Interception { owner, provider },
            });
        }
        Ok(())
    }

    /// Removes `owner`'s interception of `filename`, whether it was registered
    /// as an exact name or as a pattern.
    pub fn remove(&self, owner: ModId, filename: &str) -> bool {
        let mut removed = false;
        let key = file_name(filename).to_ascii_lowercase();
        if let Ok(mut exact) = self.exact.write()
            && let Some(list) = exact.get_mut(&key)
        {
            let before = list.len();
            list.retain(|i| i.owner != owner);
            removed |= list.len() != before;
            if list.is_empty() {
                exact.remove(&key);
            }
        }
        if let Ok(mut patterns) = self.patterns.write() {
            let before = patterns.len();
            patterns.retain(|p| !(p.interception.owner == owner && p.pattern == filename));
            removed |= patterns.len() != before;
        }
        removed
    }

    /// Drops every interception `owner` registered.
    pub fn remove_mod(&self, owner: ModId) {
        if let Ok(mut exact) = self.exact.write() {
            for list in exact.values_mut() {
                list.retain(|i| i.owner != owner);
            }
            exact.retain(|_, list| !list.is_empty());
        }
        if let Ok(mut patterns) = self.patterns.write() {
            patterns.retain(|p| p.interception.owner != owner);
        }
    }

    /// Returns the replacement for `path`, if any mod supplies one.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let name = file_name(path);
        let exact = self
            .exact
            .read()
            .ok()
            .and_then(|exact| exact.get(&name.to_ascii_lowercase()).cloned())
            .unwrap_or_default();
        let patterns = self
            .patterns
            .read()
            .map(|p| {
                p.iter()
                    .filter(|p| p.regex.is_match(name))
                    .map(|p| p.interception.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let replacement = exact.into_iter().chain(patterns).find_map(|i| {
            run_as(i.owner, "resource provider", || (i.provider)(path)).flatten()
        });
        if let Some(replacement) = &replacement {
            info!("Redirecting {path} to {replacement}");
        }
        replacement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace_with(path: &'static str) -> ResourceProvider {
        Arc::new(move |_: &str| Some(path.to_string()))
    }

    #[test]
    fn test_wildcard_regex() {
        let regex = wildcard_regex("*.dat").unwrap();
        assert!(regex.is_match("ItemShop.DAT"));
        assert!(!regex.is_match("ItemShop.dat.bak"));
        assert!(wildcard_regex("r?00.idd").unwrap().is_match("r100.idd"));
        assert!(!wildcard_regex("a+b").unwrap().is_match("aab"));
    }

    #[test]
    fn test_exact_match_wins_over_pattern() {
        let resources = ResourceInterceptor::new();
        resources
            .intercept_pattern(ModId(1), "*.dat", replace_with("pattern.dat"))
            .unwrap();
        resources.intercept(ModId(2), "shop.dat", replace_with("exact.dat"));

        assert_eq!(
            resources.resolve("data_pc/id/Shop.dat").as_deref(),
            Some("exact.dat")
        );
        assert_eq!(
            resources.resolve("data_pc\\id\\other.dat").as_deref(),
            Some("pattern.dat")
        );
        assert_eq!(resources.resolve("other.idd"), None);
    }

    #[test]
    fn test_declining_provider_falls_through() {
        let resources = ResourceInterceptor::new();
        resources.intercept(ModId(1), "a.dat", Arc::new(|_: &str| None));
        resources
            .intercept_pattern(ModId(2), "a.*", replace_with("b.dat"))
            .unwrap();
        assert_eq!(resources.resolve("a.dat").as_deref(), Some("b.dat"));
    }

    #[test]
    fn test_remove_and_remove_mod() {
        let resources = ResourceInterceptor::new();
        resources.intercept(ModId(1), "a.dat", replace_with("x"));
        resources
            .intercept_pattern(ModId(1), "*.idd", replace_with("y"))
            .unwrap();
        resources.intercept(ModId(2), "c.dat", replace_with("z"));

        assert!(!resources.remove(ModId(2), "a.dat"));
        assert!(resources.remove(ModId(1), "a.dat"));
        assert_eq!(resources.resolve("a.dat"), None);

        resources.remove_mod(ModId(1));
        assert_eq!(resources.resolve("r100.idd"), None);
        assert_eq!(resources.resolve("c.dat").as_deref(), Some("z"));
    }
}
