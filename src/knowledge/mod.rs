//! Exploit intelligence lookup.
//!
//! Maps service fingerprints (`"apache-2.4.49"`) to the attack action most
//! likely to work against them. The [`KnowledgeBase`] owns the ranking and
//! the degrade-to-no-hint rule; where the candidates come from is hidden
//! behind [`IntelSource`].

use crate::attack::AttackAction;
use crate::error::{Result, SimError};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Suggested action for the current episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub suggested_action: AttackAction,
    pub source_service: String,
    /// In [0, 1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One ranked suggestion for a single fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub action: AttackAction,
    pub confidence: f64,
    pub exploit_id: Option<String>,
    pub cve: Option<String>,
    pub description: String,
}

impl Candidate {
    pub fn new(action: AttackAction, confidence: f64) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            exploit_id: None,
            cve: None,
            description: String::new(),
        }
    }

    pub fn with_reference(mut self, exploit_id: &str, cve: Option<&str>, description: &str) -> Self {
        self.exploit_id = Some(exploit_id.to_string());
        self.cve = cve.map(str::to_string);
        self.description = description.to_string();
        self
    }
}

/// Backing source of exploit intelligence
pub trait IntelSource: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates for one fingerprint. An empty list means "nothing known";
    /// an error means the source itself could not answer.
    fn lookup(&self, fingerprint: &str) -> Result<Vec<Candidate>>;
}

/// Ranked hint lookup over a pluggable source
pub struct KnowledgeBase {
    source: Box<dyn IntelSource>,
}

impl KnowledgeBase {
    pub fn new(source: impl IntelSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Knowledge base over the built-in exploit table
    pub fn with_static_table() -> Self {
        Self::new(StaticIntel::default())
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Highest-confidence candidate across all services.
    ///
    /// Ties break on confidence (desc), then service fingerprint, then action
    /// tag, both lexical. A failing source counts as "no hint"; candidates
    /// with a non-finite confidence are dropped.
    pub fn get_best_hint(&self, discovered_services: &BTreeSet<String>) -> Option<Hint> {
        let mut best: Option<Hint> = None;

        for service in discovered_services {
            let candidates = match self.source.lookup(service) {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!("Hint lookup for {} degraded to no hint: {}", service, e);
                    continue;
                }
            };

            for candidate in candidates {
                if !candidate.confidence.is_finite() {
                    tracing::debug!(
                        "Ignoring {} candidate for {} with confidence {}",
                        candidate.action,
                        service,
                        candidate.confidence
                    );
                    continue;
                }
                let hint = Hint {
                    suggested_action: candidate.action,
                    source_service: service.clone(),
                    confidence: candidate.confidence.clamp(0.0, 1.0),
                    exploit_id: candidate.exploit_id,
                    cve: candidate.cve,
                    description: Some(candidate.description).filter(|d| !d.is_empty()),
                };

                let better = match &best {
                    None => true,
                    Some(current) => rank(&hint, current) == Ordering::Less,
                };
                if better {
                    best = Some(hint);
                }
            }
        }

        best
    }
}

/// `Less` means `a` should be preferred over `b`
fn rank(a: &Hint, b: &Hint) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.source_service.cmp(&b.source_service))
        .then_with(|| a.suggested_action.as_str().cmp(b.suggested_action.as_str()))
}

/// Fingerprint families treated as generic web services
const WEB_FAMILIES: [&str; 3] = ["http", "https", "web"];

/// Split `"mysql-5.7.33"` into product and version. The version starts at the
/// first dash followed by a digit; `"jwt-auth-service"` has none.
fn split_fingerprint(fingerprint: &str) -> (&str, Option<&str>) {
    fingerprint
        .match_indices('-')
        .find(|(i, _)| {
            fingerprint[i + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        })
        .map(|(i, _)| (&fingerprint[..i], Some(&fingerprint[i + 1..])))
        .unwrap_or((fingerprint, None))
}

/// Which versions of a product an exploit applies to
#[derive(Debug, Clone)]
enum VersionMatch {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl VersionMatch {
    /// A bare product name (no version) matches every entry
    fn matches(&self, version: Option<&str>) -> bool {
        match (self, version) {
            (_, None) | (VersionMatch::Any, _) => true,
            (VersionMatch::Exact(expected), Some(version)) => expected == version,
            (VersionMatch::Pattern(re), Some(version)) => re.is_match(version),
        }
    }
}

#[derive(Debug, Clone)]
struct TableEntry {
    versions: VersionMatch,
    candidate: Candidate,
}

/// Built-in exploit table keyed by product, each entry filtered by version
#[derive(Debug, Clone)]
pub struct StaticIntel {
    table: BTreeMap<String, Vec<TableEntry>>,
    generic_web: Vec<Candidate>,
}

impl StaticIntel {
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
            generic_web: Vec::new(),
        }
    }

    fn push(&mut self, product: &str, versions: VersionMatch, candidate: Candidate) {
        self.table
            .entry(product.to_ascii_lowercase())
            .or_default()
            .push(TableEntry { versions, candidate });
    }

    /// Entry for one exact fingerprint, or every version when it carries none
    pub fn insert(&mut self, fingerprint: &str, candidate: Candidate) {
        let fingerprint = fingerprint.to_ascii_lowercase();
        let (product, version) = split_fingerprint(&fingerprint);
        let versions = match version {
            Some(version) => VersionMatch::Exact(version.to_string()),
            None => VersionMatch::Any,
        };
        self.push(product, versions, candidate);
    }

    pub fn with_entry(mut self, fingerprint: &str, candidate: Candidate) -> Self {
        self.insert(fingerprint, candidate);
        self
    }

    /// Entry for every version of `product` matching `version_pattern`
    pub fn insert_pattern(&mut self, product: &str, version_pattern: &str, candidate: Candidate) -> Result<()> {
        let re = Regex::new(version_pattern).map_err(|e| {
            SimError::Config(format!("bad version pattern for {}: {}", product, e))
        })?;
        self.push(product, VersionMatch::Pattern(re), candidate);
        Ok(())
    }

    pub fn with_pattern(mut self, product: &str, version_pattern: &str, candidate: Candidate) -> Result<Self> {
        self.insert_pattern(product, version_pattern, candidate)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for StaticIntel {
    fn default() -> Self {
        use AttackAction::*;

        let mut intel = Self::empty();
        let entries = [
            ("apache", r"^2\.4\.(49|50)$", Candidate::new(PathTraversalAttempt, 0.9)
                .with_reference("50383", Some("CVE-2021-41773"), "Apache 2.4.49 path traversal")),
            ("apache", r"^2\.4\.49$", Candidate::new(CommandInjectionAttempt, 0.6)
                .with_reference("50406", Some("CVE-2021-41773"), "Apache 2.4.49 traversal to RCE with mod_cgi")),
            ("apache", r"^2\.4\.50$", Candidate::new(PathTraversalAttempt, 0.95)
                .with_reference("50512", Some("CVE-2021-42013"), "Apache 2.4.50 path traversal")),
            ("apache", r"^2\.4\.50$", Candidate::new(CommandInjectionAttempt, 0.85)
                .with_reference("50512", Some("CVE-2021-42013"), "Apache 2.4.50 RCE")),
            ("mysql", r"^5\.(1|5|6|7)\.", Candidate::new(AuthBypassAttempt, 0.85)
                .with_reference("19092", Some("CVE-2012-2122"), "MySQL authentication bypass")),
            ("mysql", r"^5\.[0-7]\.", Candidate::new(SqlInjectionAttempt, 0.8)
                .with_reference("17491", Some("CVE-2010-1850"), "MySQL SQL injection")),
            ("postgresql", r"^(9\.3|10\.[0-1]|11\.[0-1])", Candidate::new(CommandInjectionAttempt, 0.9)
                .with_reference("46813", Some("CVE-2019-9193"), "PostgreSQL COPY FROM PROGRAM")),
            ("postgresql", r"^1[2-3]\.", Candidate::new(SqlInjectionAttempt, 0.75)
                .with_reference("generic-pg", None, "PostgreSQL injectable query surface")),
            ("nginx", r"^1\.[0-3]\.[0-9]$", Candidate::new(PrivilegeEscalationAttempt, 0.7)
                .with_reference("25775", Some("CVE-2013-2028"), "Nginx chunked encoding overflow")),
            ("nginx", r"^1\.1[4-8]\.", Candidate::new(PathTraversalAttempt, 0.55)
                .with_reference("generic-nginx", None, "Nginx alias misconfiguration traversal")),
            ("php", r"^7\.[0-3]", Candidate::new(CommandInjectionAttempt, 0.8)
                .with_reference("47553", Some("CVE-2019-11043"), "PHP-FPM underflow RCE")),
            ("redis", r"^[5-6]\.", Candidate::new(CommandInjectionAttempt, 0.9)
                .with_reference("47195", Some("CVE-2022-0543"), "Redis Lua sandbox escape")),
            ("elasticsearch", r"^1\.[0-1]\.", Candidate::new(CommandInjectionAttempt, 0.95)
                .with_reference("33370", Some("CVE-2014-3120"), "Elasticsearch dynamic script RCE")),
            ("openssh", r"^7\.[0-7]", Candidate::new(AuthBypassAttempt, 0.6)
                .with_reference("45233", Some("CVE-2018-15473"), "OpenSSH username enumeration")),
            ("proftpd", r"^1\.3\.5", Candidate::new(CommandInjectionAttempt, 0.75)
                .with_reference("37262", Some("CVE-2015-3306"), "ProFTPD mod_copy command execution")),
        ];

        for (product, pattern, candidate) in entries {
            if let Err(e) = intel.insert_pattern(product, pattern, candidate) {
                tracing::warn!("Skipping exploit table entry: {}", e);
            }
        }
        intel.insert(
            "jwt-auth-service",
            Candidate::new(TokenReuseAttempt, 0.7)
                .with_reference("generic-jwt", None, "Unrotated signing key allows token replay"),
        );

        intel.generic_web = vec![
            Candidate::new(XssAttempt, 0.5)
                .with_reference("generic_001", None, "Web applications commonly vulnerable to XSS"),
            Candidate::new(SqlInjectionAttempt, 0.5)
                .with_reference("generic_002", None, "Web applications commonly vulnerable to SQL injection"),
        ];

        intel
    }
}

impl IntelSource for StaticIntel {
    fn name(&self) -> &str {
        "static-exploit-table"
    }

    fn lookup(&self, fingerprint: &str) -> Result<Vec<Candidate>> {
        let key = fingerprint.to_ascii_lowercase();
        let (product, version) = split_fingerprint(&key);

        let matched: Vec<Candidate> = self
            .table
            .get(product)
            .into_iter()
            .flatten()
            .filter(|entry| entry.versions.matches(version))
            .map(|entry| entry.candidate.clone())
            .collect();
        if !matched.is_empty() {
            return Ok(matched);
        }

        let family = key.split('-').next().unwrap_or_default();
        if WEB_FAMILIES.contains(&family) {
            return Ok(self.generic_web.clone());
        }

        Ok(Vec::new())
    }
}

/// Raw record returned by an exploit search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploitRecord {
    pub title: String,
    pub edb_id: String,
    pub path: Option<String>,
}

/// Live exploit search (an exploit-db mirror, a searchsploit wrapper, ...)
pub trait ExploitSearch: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<ExploitRecord>>;
}

/// Confidence assigned to candidates inferred from search titles
pub const SEARCH_CONFIDENCE: f64 = 0.8;
/// Records considered per query
pub const SEARCH_RESULT_LIMIT: usize = 5;

/// Intel source backed by a live exploit search
pub struct SearchIntel<Q> {
    search: Q,
}

impl<Q: ExploitSearch> SearchIntel<Q> {
    pub fn new(search: Q) -> Self {
        Self { search }
    }
}

impl<Q: ExploitSearch> IntelSource for SearchIntel<Q> {
    fn name(&self) -> &str {
        "exploit-search"
    }

    fn lookup(&self, fingerprint: &str) -> Result<Vec<Candidate>> {
        // "apache-2.4.49" -> "apache 2.4.49"
        let query = fingerprint.replacen('-', " ", 1);
        let records = self.search.search(&query)?;

        Ok(records
            .iter()
            .take(SEARCH_RESULT_LIMIT)
            .filter_map(|record| {
                let action = infer_action_from_title(&record.title, fingerprint)?;
                let cve = extract_cve(&record.title);
                Some(Candidate::new(action, SEARCH_CONFIDENCE).with_reference(
                    &record.edb_id,
                    cve.as_deref(),
                    &record.title,
                ))
            })
            .collect())
    }
}

/// Map an exploit title to the action it exercises
pub fn infer_action_from_title(title: &str, service: &str) -> Option<AttackAction> {
    let title = title.to_ascii_lowercase();
    let service = service.to_ascii_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| title.contains(t));

    if has(&["sql injection", "sqli"]) {
        return Some(AttackAction::SqlInjectionAttempt);
    }
    if has(&["path traversal", "directory traversal", "local file inclusion", "lfi"]) {
        return Some(AttackAction::PathTraversalAttempt);
    }
    if has(&["command injection", "remote code execution", "code execution", "rce"]) {
        return Some(AttackAction::CommandInjectionAttempt);
    }
    if has(&["authentication bypass", "auth bypass", "login bypass"]) {
        return Some(AttackAction::AuthBypassAttempt);
    }
    if has(&["xss", "cross-site scripting"]) {
        return Some(AttackAction::XssAttempt);
    }
    if has(&["privilege escalation", "privilege", "escalation"]) {
        return Some(AttackAction::PrivilegeEscalationAttempt);
    }
    if has(&["session fixation", "session hijack"]) {
        return Some(AttackAction::SessionHijackAttempt);
    }

    if ["mysql", "postgresql", "sql"].iter().any(|s| service.contains(s)) {
        return Some(AttackAction::SqlInjectionAttempt);
    }
    if ["apache", "nginx", "web"].iter().any(|s| service.contains(s)) {
        return Some(AttackAction::PathTraversalAttempt);
    }

    None
}

fn extract_cve(title: &str) -> Option<String> {
    let upper = title.to_ascii_uppercase();
    let start = upper.find("CVE-")?;
    let rest = &upper[start + 4..];

    let year: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if year.len() != 4 || rest.as_bytes().get(4) != Some(&b'-') {
        return None;
    }
    let seq: String = rest[5..].chars().take_while(char::is_ascii_digit).collect();
    if seq.is_empty() {
        return None;
    }

    Some(format!("CVE-{}-{}", year, seq))
}

/// Memoises successful lookups per fingerprint
pub struct CachedIntel<S> {
    inner: S,
    cache: RwLock<HashMap<String, Vec<Candidate>>>,
}

impl<S: IntelSource> CachedIntel<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.read().len()
    }
}

impl<S: IntelSource> IntelSource for CachedIntel<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lookup(&self, fingerprint: &str) -> Result<Vec<Candidate>> {
        if let Some(hit) = self.cache.read().get(fingerprint) {
            return Ok(hit.clone());
        }

        let candidates = self.inner.lookup(fingerprint)?;
        self.cache
            .write()
            .insert(fingerprint.to_string(), candidates.clone());
        Ok(candidates)
    }
}

/// Tries `primary`, falls back to `secondary` when the primary errors
pub struct FallbackIntel<P, S> {
    primary: P,
    secondary: S,
}

impl<P: IntelSource, S: IntelSource> FallbackIntel<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: IntelSource, S: IntelSource> IntelSource for FallbackIntel<P, S> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn lookup(&self, fingerprint: &str) -> Result<Vec<Candidate>> {
        match self.primary.lookup(fingerprint) {
            Ok(candidates) => Ok(candidates),
            Err(e) => {
                tracing::debug!(
                    "{} failed for {} ({}), using {}",
                    self.primary.name(),
                    fingerprint,
                    e,
                    self.secondary.name()
                );
                self.secondary.lookup(fingerprint)
            }
        }
    }
}

/// Source that always fails; stands in for an unreachable live backend
pub struct UnavailableIntel {
    reason: String,
}

impl UnavailableIntel {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl IntelSource for UnavailableIntel {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn lookup(&self, _fingerprint: &str) -> Result<Vec<Candidate>> {
        Err(SimError::KnowledgeSourceUnavailable {
            source_name: self.name().to_string(),
            reason: self.reason.clone(),
        })
    }
}
