//! Response contract parsing and assertion evaluation.
//!
//! Every QMS response carries the same envelope: a domain status code
//! (distinct from the HTTP status, which is always 200), a message, and
//! an operation-specific result object. Domain status 1002 ("not found")
//! is a valid outcome with its own zeroed-shape contract, not an error.
//!
//! Validators evaluate every named predicate independently -- no
//! short-circuiting -- so a failing response reports all violated
//! expectations at once.

use serde::Deserialize;
use serde_json::Value;

/// Domain status for a successful operation.
pub const STATUS_OK: i64 = 1001;
/// Domain status for an unknown namespace/resource (or version conflict).
pub const STATUS_NOT_FOUND: i64 = 1002;

/// Message accompanying [`STATUS_OK`].
pub const MSG_OK: &str = "ok";
/// Message accompanying [`STATUS_NOT_FOUND`].
pub const MSG_NOT_FOUND: &str = "not found";

/// The envelope every QMS response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub status: i64,
    pub msg: String,
    #[serde(default)]
    pub result: Value,
}

impl Envelope {
    /// Parse a response body into an envelope.
    ///
    /// A body that is not valid JSON, or that lacks the envelope fields,
    /// is a contract violation (the transport succeeded); callers fold
    /// the error into the verdict as an `invalid JSON body` failure.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Result fields of an `allow` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowResult {
    pub ok: bool,
    pub wait_time: i64,
}

/// Result fields of an `alloc` or `free` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocResult {
    pub ok: bool,
    pub remaining_tokens: i64,
    pub current_version: i64,
}

/// Result fields of a `view` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewResult {
    pub allocated: i64,
    pub capacity: i64,
    pub version: i64,
}

/// Which contract branch a response is held against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The key exists and the quota must have been granted outright
    /// (fresh capacity, single client). Used by the smoke probes.
    Granted,
    /// The key exists; denial or wait is acceptable, not-found is not.
    /// Used by stress scenarios on pre-provisioned keys, where a 1002
    /// would mean a mis-provisioned environment, not a passing run.
    Found,
    /// The key does not exist; the zeroed not-found shape is required.
    NotFound,
    /// Found or not-found are both acceptable (optimistic-version
    /// conflicts on alloc/free surface as the not-found branch). The
    /// shape of whichever branch the status selects is still enforced.
    Either,
}

/// Outcome of validating one response.
///
/// `granted` is set only for `allow` responses where the quota was
/// granted with zero wait; the scenario executor consumes it to chain
/// the secondary system-under-test call.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    /// Every violated predicate, named. Empty means the response passed.
    pub failures: Vec<String>,
    /// `allow` returned `ok == true` with `wait_time == 0`.
    pub granted: bool,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Accumulates named predicate outcomes without short-circuiting.
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn new() -> Self {
        Self {
            failures: Vec::new(),
        }
    }

    fn check(&mut self, name: &str, passed: bool) {
        if !passed {
            self.failures.push(name.to_string());
        }
    }

    /// Envelope-level checks shared by every operation: domain status and
    /// message for the selected branch. Returns the branch to validate
    /// the result shape against, or `None` when the status matches
    /// neither branch.
    fn envelope(&mut self, env: &Envelope, expect: Expectation) -> Option<bool> {
        match expect {
            Expectation::Granted | Expectation::Found => {
                self.check("status == 1001", env.status == STATUS_OK);
                self.check("msg == \"ok\"", env.msg == MSG_OK);
                Some(true)
            },
            Expectation::NotFound => {
                self.check("status == 1002", env.status == STATUS_NOT_FOUND);
                self.check("msg == \"not found\"", env.msg == MSG_NOT_FOUND);
                Some(false)
            },
            Expectation::Either => match env.status {
                STATUS_OK => {
                    self.check("msg == \"ok\"", env.msg == MSG_OK);
                    Some(true)
                },
                STATUS_NOT_FOUND => {
                    self.check("msg == \"not found\"", env.msg == MSG_NOT_FOUND);
                    Some(false)
                },
                _ => {
                    self.check("status in {1001, 1002}", false);
                    None
                },
            },
        }
    }

    fn into_verdict(self, granted: bool) -> Verdict {
        Verdict {
            failures: self.failures,
            granted,
        }
    }
}

/// Deserialize the result object, recording a named failure on mismatch.
fn parse_result<T: serde::de::DeserializeOwned>(checks: &mut Checks, env: &Envelope) -> Option<T> {
    match serde_json::from_value(env.result.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            checks.failures.push(format!("result shape: {e}"));
            None
        },
    }
}

/// Validate an `allow` response against the selected branch.
pub fn validate_allow(env: &Envelope, expect: Expectation) -> Verdict {
    let mut checks = Checks::new();
    let branch = checks.envelope(env, expect);
    let mut granted = false;

    if let Some(found) = branch {
        if let Some(result) = parse_result::<AllowResult>(&mut checks, env) {
            if found {
                checks.check("result.wait_time >= 0", result.wait_time >= 0);
                if expect == Expectation::Granted {
                    checks.check("result.ok == true", result.ok);
                    checks.check("result.wait_time == 0", result.wait_time == 0);
                }
                granted = result.ok && result.wait_time == 0;
            } else {
                checks.check("result.ok == false", !result.ok);
                checks.check("result.wait_time == 0", result.wait_time == 0);
            }
        }
    }

    checks.into_verdict(granted)
}

/// Validate an `alloc` or `free` response against the selected branch.
pub fn validate_alloc(env: &Envelope, expect: Expectation) -> Verdict {
    let mut checks = Checks::new();
    let branch = checks.envelope(env, expect);

    if let Some(found) = branch {
        if let Some(result) = parse_result::<AllocResult>(&mut checks, env) {
            if found {
                checks.check("result.ok == true", result.ok);
                checks.check("result.remaining_tokens >= 0", result.remaining_tokens >= 0);
                checks.check("result.current_version >= 0", result.current_version >= 0);
            } else {
                checks.check("result.ok == false", !result.ok);
                checks.check("result.remaining_tokens == 0", result.remaining_tokens == 0);
                checks.check("result.current_version == 0", result.current_version == 0);
            }
        }
    }

    checks.into_verdict(false)
}

/// Validate a `view` response against the selected branch.
///
/// A found record always carries `version >= 1`; the not-found branch is
/// fully zeroed.
pub fn validate_view(env: &Envelope, expect: Expectation) -> Verdict {
    let mut checks = Checks::new();
    let branch = checks.envelope(env, expect);

    if let Some(found) = branch {
        if let Some(result) = parse_result::<ViewResult>(&mut checks, env) {
            if found {
                checks.check("result.allocated >= 0", result.allocated >= 0);
                checks.check("result.capacity >= 0", result.capacity >= 0);
                checks.check("result.version >= 1", result.version >= 1);
            } else {
                checks.check("result.allocated == 0", result.allocated == 0);
                checks.check("result.capacity == 0", result.capacity == 0);
                checks.check("result.version == 0", result.version == 0);
            }
        }
    }

    checks.into_verdict(false)
}
