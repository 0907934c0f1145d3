//! Static catalog of known validation tools and its dependency DAG.
//!
//! The registry is read-only after construction. Construction validates the
//! catalog: unique lowercase-hyphen names, every dependency registered, and
//! an acyclic dependency graph; any violation is a configuration error.

use anyhow::Result;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::OrchestratorError;

/// License tier driving the execution router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseClass {
    Permissive,
    Copyleft,
    Conditional,
}

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    /// Ordered file-path patterns; a tool runs when any of them matches.
    pub matchers: Vec<Pattern>,
    pub license: LicenseClass,
    /// Argv template. `{files}` expands to the file list; `{fix}` expands to
    /// the fix flag when fixing is requested, else to the check flag.
    pub invocation: Vec<String>,
    /// Flag substituted for `{fix}` when fixing. `Some("")` marks a tool
    /// whose fix mode is its bare invocation (formatters).
    pub fix_flag: Option<String>,
    /// Flag substituted for `{fix}` in check mode.
    pub check_flag: Option<String>,
    pub depends_on: Vec<String>,
    /// Relative scheduling weight; higher runs earlier within a level.
    pub estimated_cost: u32,
    pub description: String,
}

impl Tool {
    pub fn supports_fix(&self) -> bool {
        self.fix_flag.is_some()
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.matchers.iter().any(|m| {
            m.matches_path(path)
                || path
                    .file_name()
                    .map(|f| m.matches_path(Path::new(f)))
                    .unwrap_or(false)
        })
    }

    /// Expand the invocation template for a concrete file batch.
    pub fn build_argv(&self, files: &[String], fix: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.invocation.len() + files.len());
        for part in &self.invocation {
            match part.as_str() {
                "{files}" => argv.extend(files.iter().cloned()),
                "{fix}" => {
                    let flag = if fix && self.fix_flag.is_some() {
                        self.fix_flag.as_deref()
                    } else {
                        self.check_flag.as_deref()
                    };
                    if let Some(flag) = flag {
                        if !flag.is_empty() {
                            argv.push(flag.to_string());
                        }
                    }
                }
                other => argv.push(other.to_string()),
            }
        }
        argv
    }
}

/// Compile-time description of a built-in tool.
struct ToolSpec {
    name: &'static str,
    matchers: &'static [&'static str],
    license: LicenseClass,
    invocation: &'static str,
    fix_flag: Option<&'static str>,
    check_flag: Option<&'static str>,
    depends_on: &'static [&'static str],
    estimated_cost: u32,
    description: &'static str,
}

pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
    levels: Vec<Vec<String>>,
}

impl ToolRegistry {
    /// Build a registry from explicit tools, validating names, edges and
    /// acyclicity.
    pub fn from_tools(tools: Vec<Tool>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for tool in tools {
            if !is_valid_name(&tool.name) {
                return Err(OrchestratorError::configuration(format!(
                    "invalid tool name `{}`: lowercase words separated by hyphens required",
                    tool.name
                ))
                .into());
            }
            let name = tool.name.clone();
            if map.insert(name.clone(), tool).is_some() {
                return Err(OrchestratorError::configuration(format!(
                    "duplicate tool `{name}` in registry"
                ))
                .into());
            }
        }

        for tool in map.values() {
            for dep in &tool.depends_on {
                if !map.contains_key(dep) {
                    return Err(OrchestratorError::configuration(format!(
                        "tool `{}` depends on unregistered tool `{dep}`",
                        tool.name
                    ))
                    .into());
                }
            }
        }

        let levels = kahn_levels(&map)?;
        Ok(Self { tools: map, levels })
    }

    /// The built-in catalog.
    pub fn builtin() -> Result<Self> {
        let mut tools = Vec::with_capacity(BUILTIN_TOOLS.len());
        for spec in BUILTIN_TOOLS {
            let mut matchers = Vec::with_capacity(spec.matchers.len());
            for raw in spec.matchers {
                let pattern = Pattern::new(raw).map_err(|err| {
                    OrchestratorError::configuration(format!(
                        "bad matcher `{raw}` for tool `{}`: {err}",
                        spec.name
                    ))
                })?;
                matchers.push(pattern);
            }
            let invocation = shell_words::split(spec.invocation).map_err(|err| {
                OrchestratorError::configuration(format!(
                    "bad invocation template for tool `{}`: {err}",
                    spec.name
                ))
            })?;
            tools.push(Tool {
                name: spec.name.to_string(),
                matchers,
                license: spec.license,
                invocation,
                fix_flag: spec.fix_flag.map(str::to_string),
                check_flag: spec.check_flag.map(str::to_string),
                depends_on: spec.depends_on.iter().map(|d| d.to_string()).collect(),
                estimated_cost: spec.estimated_cost,
                description: spec.description.to_string(),
            });
        }
        Self::from_tools(tools)
    }

    pub fn lookup(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools whose matchers accept `path`, in catalog (name) order.
    pub fn tools_matching(&self, path: &Path) -> Vec<&Tool> {
        self.tools.values().filter(|t| t.matches(path)).collect()
    }

    /// Kahn ordering of the whole catalog. Each level contains tools whose
    /// dependencies all live in earlier levels; within a level, tools are
    /// ordered by estimated cost descending, then name.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn kahn_levels(tools: &BTreeMap<String, Tool>) -> Result<Vec<Vec<String>>> {
    let mut remaining: BTreeSet<&str> = tools.keys().map(String::as_str).collect();
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let mut level: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|name| {
                tools[*name]
                    .depends_on
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            })
            .collect();

        if level.is_empty() {
            // Whatever is left participates in (or depends on) a cycle.
            let cycle = find_cycle(tools, &remaining);
            return Err(OrchestratorError::configuration(format!(
                "tool dependency cycle: {}",
                cycle.join(" -> ")
            ))
            .into());
        }

        level.sort_by(|a, b| {
            tools[*b]
                .estimated_cost
                .cmp(&tools[*a].estimated_cost)
                .then_with(|| a.cmp(b))
        });

        for name in &level {
            remaining.remove(name);
            placed.insert(name);
        }
        levels.push(level.into_iter().map(str::to_string).collect());
    }

    Ok(levels)
}

/// Walk dependency edges inside the stuck set until a node repeats.
fn find_cycle(tools: &BTreeMap<String, Tool>, stuck: &BTreeSet<&str>) -> Vec<String> {
    let start = match stuck.iter().next() {
        Some(s) => *s,
        None => return Vec::new(),
    };
    let mut seen: Vec<&str> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = seen.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = seen[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        seen.push(current);
        let next = tools[current]
            .depends_on
            .iter()
            .find(|dep| stuck.contains(dep.as_str()));
        match next {
            Some(dep) => current = dep.as_str(),
            None => return seen.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const BUILTIN_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "ruff-format",
        matchers: &["*.py", "*.pyi"],
        license: LicenseClass::Permissive,
        invocation: "ruff format {fix} {files}",
        fix_flag: Some(""),
        check_flag: Some("--check"),
        depends_on: &[],
        estimated_cost: 2,
        description: "Python formatter",
    },
    ToolSpec {
        name: "ruff-check",
        matchers: &["*.py", "*.pyi"],
        license: LicenseClass::Permissive,
        invocation: "ruff check {fix} {files}",
        fix_flag: Some("--fix"),
        check_flag: None,
        depends_on: &["ruff-format"],
        estimated_cost: 3,
        description: "Python linter",
    },
    ToolSpec {
        name: "mypy",
        matchers: &["*.py"],
        license: LicenseClass::Permissive,
        invocation: "mypy --no-error-summary {files}",
        fix_flag: None,
        check_flag: None,
        depends_on: &["ruff-check"],
        estimated_cost: 8,
        description: "Python type checker",
    },
    ToolSpec {
        name: "shfmt",
        matchers: &["*.sh", "*.bash"],
        license: LicenseClass::Permissive,
        invocation: "shfmt {fix} {files}",
        fix_flag: Some("-w"),
        check_flag: Some("-d"),
        depends_on: &[],
        estimated_cost: 1,
        description: "Shell formatter",
    },
    ToolSpec {
        name: "shellcheck",
        matchers: &["*.sh", "*.bash"],
        license: LicenseClass::Copyleft,
        invocation: "shellcheck {files}",
        fix_flag: None,
        check_flag: None,
        depends_on: &["shfmt"],
        estimated_cost: 3,
        description: "Shell linter (GPL; sidecar only)",
    },
    ToolSpec {
        name: "prettier",
        matchers: &["*.js", "*.jsx", "*.ts", "*.tsx", "*.json", "*.md", "*.css"],
        license: LicenseClass::Permissive,
        invocation: "prettier {fix} {files}",
        fix_flag: Some("--write"),
        check_flag: Some("--check"),
        depends_on: &[],
        estimated_cost: 2,
        description: "Formatter for web languages and markup",
    },
    ToolSpec {
        name: "eslint",
        matchers: &["*.js", "*.jsx", "*.ts", "*.tsx"],
        license: LicenseClass::Permissive,
        invocation: "eslint {fix} {files}",
        fix_flag: Some("--fix"),
        check_flag: None,
        depends_on: &["prettier"],
        estimated_cost: 5,
        description: "JavaScript/TypeScript linter",
    },
    ToolSpec {
        name: "yamllint",
        matchers: &["*.yaml", "*.yml"],
        license: LicenseClass::Copyleft,
        invocation: "yamllint -f parsable {files}",
        fix_flag: None,
        check_flag: None,
        depends_on: &[],
        estimated_cost: 1,
        description: "YAML linter (GPL; sidecar only)",
    },
    ToolSpec {
        name: "hadolint",
        matchers: &["Dockerfile", "Dockerfile.*", "*.dockerfile"],
        license: LicenseClass::Copyleft,
        invocation: "hadolint {files}",
        fix_flag: None,
        check_flag: None,
        depends_on: &[],
        estimated_cost: 1,
        description: "Dockerfile linter (GPL; sidecar only)",
    },
    ToolSpec {
        name: "actionlint",
        matchers: &[".github/workflows/*.yml", ".github/workflows/*.yaml"],
        license: LicenseClass::Permissive,
        invocation: "actionlint {files}",
        fix_flag: None,
        check_flag: None,
        depends_on: &["yamllint"],
        estimated_cost: 2,
        description: "GitHub Actions workflow linter",
    },
    ToolSpec {
        name: "gitleaks",
        matchers: &["*"],
        license: LicenseClass::Permissive,
        invocation: "gitleaks detect --no-banner --no-git --source .",
        fix_flag: None,
        check_flag: None,
        depends_on: &[],
        estimated_cost: 10,
        description: "Secret scanner over the working tree",
    },
];

/// Fast subset used by the blocking pre-commit hook.
pub const FAST_TOOLS: &[&str] = &["ruff-format", "ruff-check", "shfmt", "prettier", "yamllint"];
