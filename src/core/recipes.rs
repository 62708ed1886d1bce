//! Recipe registry and mutation actions.
//!
//! A recipe is a named mutation built from declared actions over an explicit
//! file list. The registry owns the category → recipe mapping and
//! instantiates recipes against the concrete files a fix candidate points
//! at. Mutations are conservative text transformations; semantic
//! equivalence is not guaranteed and verification decides whether a change
//! survives.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::{OdavlError, Result};
use crate::core::findings::IssueCategory;

/// Maximum characters kept in a diff preview.
pub const DIFF_PREVIEW_LIMIT: usize = 200;

/// Kinds of mutation a recipe action can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Sort and dedupe the leading import block of each file
    RewriteImports,
    /// Remove debug logging statements
    StripDebugStatements,
    /// Replace inline credential literals with environment lookups
    RedactInlineSecrets,
    /// Strip loose semver range markers from manifest version strings
    PinDependencyVersions,
    /// Literal find/replace driven by action params
    PatchFile,
}

/// One declared mutation step of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeAction {
    /// What this action does
    pub kind: ActionKind,

    /// Workspace-relative files this action touches
    pub files: Vec<String>,

    /// Kind-specific parameters (e.g. `find`/`replace` for patches)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, serde_json::Value>,
}

/// A named mutation recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Stable recipe id (e.g. `fix-security`)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Mutation steps, applied in order
    pub actions: Vec<RecipeAction>,
}

impl Recipe {
    /// All files any action of this recipe touches, deduplicated and
    /// ordered.
    pub fn files_affected(&self) -> BTreeSet<String> {
        self.actions
            .iter()
            .flat_map(|action| action.files.iter().cloned())
            .map(|file| file.replace('\\', "/"))
            .collect()
    }

    /// Apply every action against the workspace, returning the evidence of
    /// what changed. Files are rewritten in place; the caller is expected to
    /// hold snapshots for rollback.
    pub fn apply(&self, workspace_root: &Path) -> Result<AppliedChanges> {
        let mut changes = AppliedChanges::default();

        for action in &self.actions {
            for file in &action.files {
                let path = workspace_root.join(file);
                let original = fs::read_to_string(&path).map_err(|e| {
                    OdavlError::io(format!("Failed to read {}", path.display()), e)
                })?;

                let mutated = apply_action(action, &original)?;
                if mutated == original {
                    continue;
                }

                fs::write(&path, &mutated).map_err(|e| {
                    OdavlError::io(format!("Failed to write {}", path.display()), e)
                })?;

                changes.record(file, &original, &mutated);
            }
        }

        Ok(changes)
    }
}

/// Per-file diff evidence with a bounded preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixDiff {
    /// Workspace-relative file path
    pub file: String,
    /// Lines added
    pub loc_added: u32,
    /// Lines removed
    pub loc_removed: u32,
    /// First changed lines, truncated to [`DIFF_PREVIEW_LIMIT`] chars
    pub diff_preview: String,
}

/// Aggregated evidence of an applied recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedChanges {
    /// Files whose bytes changed
    pub files_modified: Vec<String>,
    /// Total lines changed (added + removed)
    pub loc_changed: u32,
    /// Per-file diffs
    pub diffs: Vec<FixDiff>,
}

impl AppliedChanges {
    fn record(&mut self, file: &str, original: &str, mutated: &str) {
        let diff = diff_lines(file, original, mutated);
        self.loc_changed += diff.loc_added + diff.loc_removed;
        self.files_modified.push(file.to_string());
        self.diffs.push(diff);
    }
}

/// Line-level diff summary between two versions of a file.
fn diff_lines(file: &str, original: &str, mutated: &str) -> FixDiff {
    let old_lines: BTreeSet<&str> = original.lines().collect();
    let new_lines: BTreeSet<&str> = mutated.lines().collect();

    let removed: Vec<&str> = old_lines.difference(&new_lines).copied().collect();
    let added: Vec<&str> = new_lines.difference(&old_lines).copied().collect();

    let mut preview = String::new();
    for line in removed.iter().take(3) {
        preview.push_str(&format!("- {line}\n"));
    }
    for line in added.iter().take(3) {
        preview.push_str(&format!("+ {line}\n"));
    }
    preview.truncate(DIFF_PREVIEW_LIMIT);

    FixDiff {
        file: file.to_string(),
        loc_added: added.len() as u32,
        loc_removed: removed.len() as u32,
        diff_preview: preview,
    }
}

/// Apply one action to file content, returning the mutated content.
fn apply_action(action: &RecipeAction, content: &str) -> Result<String> {
    match action.kind {
        ActionKind::RewriteImports => Ok(rewrite_imports(content)),
        ActionKind::StripDebugStatements => Ok(strip_debug_statements(content)),
        ActionKind::RedactInlineSecrets => Ok(redact_inline_secrets(content)),
        ActionKind::PinDependencyVersions => Ok(pin_dependency_versions(content)),
        ActionKind::PatchFile => patch_file(action, content),
    }
}

/// Sort and dedupe the contiguous leading import block.
fn rewrite_imports(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let block_end = lines
        .iter()
        .position(|line| {
            let trimmed = line.trim();
            !(trimmed.is_empty()
                || trimmed.starts_with("import ")
                || trimmed.starts_with("use ")
                || trimmed.starts_with("from ")
                || trimmed.starts_with("const ") && trimmed.contains("require("))
        })
        .unwrap_or(lines.len());

    let mut imports: Vec<&str> = lines[..block_end]
        .iter()
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if imports.is_empty() {
        return content.to_string();
    }
    imports.sort_unstable();
    imports.dedup();

    let mut result: Vec<&str> = imports;
    if block_end < lines.len() {
        result.push("");
        result.extend(&lines[block_end..]);
    }
    join_preserving_trailing_newline(&result, content)
}

/// Drop lines that are plainly debug logging.
fn strip_debug_statements(content: &str) -> String {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !(trimmed.starts_with("console.log(")
                || trimmed.starts_with("console.debug(")
                || trimmed == "debugger;"
                || trimmed.starts_with("println!(\"DEBUG"))
        })
        .collect();
    join_preserving_trailing_newline(&kept, content)
}

/// Replace quoted credential literals with an environment lookup marker.
fn redact_inline_secrets(content: &str) -> String {
    const KEYS: &[&str] = &["password", "secret", "token", "api_key", "apikey"];

    let redacted: Vec<String> = content
        .lines()
        .map(|line| {
            let lower = line.to_ascii_lowercase();
            let is_assignment = KEYS
                .iter()
                .any(|key| lower.contains(key) && (line.contains('=') || line.contains(':')));
            if !is_assignment {
                return line.to_string();
            }
            redact_quoted_literal(line)
        })
        .collect();

    let refs: Vec<&str> = redacted.iter().map(String::as_str).collect();
    join_preserving_trailing_newline(&refs, content)
}

/// Replace the last quoted literal on the line with an env lookup.
fn redact_quoted_literal(line: &str) -> String {
    for quote in ['"', '\''] {
        let positions: Vec<usize> = line
            .char_indices()
            .filter(|(_, c)| *c == quote)
            .map(|(i, _)| i)
            .collect();
        if positions.len() >= 2 {
            let open = positions[positions.len() - 2];
            let close = positions[positions.len() - 1];
            if close > open + 1 {
                let mut result = String::with_capacity(line.len());
                result.push_str(&line[..open]);
                result.push_str("process.env.ODAVL_REDACTED");
                result.push_str(&line[close + 1..]);
                return result;
            }
        }
    }
    line.to_string()
}

/// Strip `^` and `~` range markers from JSON manifest version strings.
fn pin_dependency_versions(content: &str) -> String {
    content.replace("\"^", "\"").replace("\"~", "\"")
}

/// Literal find/replace; both params optional (no-op when absent).
fn patch_file(action: &RecipeAction, content: &str) -> Result<String> {
    let find = action.params.get("find").and_then(|v| v.as_str());
    let replace = action.params.get("replace").and_then(|v| v.as_str());

    match (find, replace) {
        (Some(find), Some(replace)) => {
            if find.is_empty() {
                return Err(OdavlError::validation(
                    "patch-file action requires a non-empty 'find' param",
                ));
            }
            Ok(content.replace(find, replace))
        }
        (None, None) => Ok(content.to_string()),
        _ => Err(OdavlError::validation(
            "patch-file action requires both 'find' and 'replace' params",
        )),
    }
}

fn join_preserving_trailing_newline(lines: &[&str], original: &str) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') && !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// Registry of recipe definitions and the category mapping table.
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: IndexMap<String, Recipe>,
    by_category: IndexMap<IssueCategory, Vec<String>>,
}

impl RecipeRegistry {
    /// The standard registry with the fixed category mapping.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        for (recipe, category) in standard_recipes() {
            registry.register(recipe, &[category]);
        }
        registry
    }

    /// Register a recipe and map it to the categories it can fix.
    pub fn register(&mut self, recipe: Recipe, categories: &[IssueCategory]) {
        for category in categories {
            self.by_category
                .entry(*category)
                .or_default()
                .push(recipe.id.clone());
        }
        self.recipes.insert(recipe.id.clone(), recipe);
    }

    /// Recipe ids proposed for an issue category; categories without an
    /// automated recipe return an empty list.
    pub fn recipes_for_category(&self, category: IssueCategory) -> Vec<String> {
        self.by_category.get(&category).cloned().unwrap_or_default()
    }

    /// Look up a recipe definition by id.
    pub fn get(&self, recipe_id: &str) -> Option<&Recipe> {
        self.recipes.get(recipe_id)
    }

    /// All known recipe ids, in registration order.
    pub fn recipe_ids(&self) -> Vec<String> {
        self.recipes.keys().cloned().collect()
    }

    /// Instantiate a recipe against concrete target files.
    ///
    /// The registry definition declares action kinds; the instance binds the
    /// files a fix candidate points at.
    pub fn instantiate(&self, recipe_id: &str, files: Vec<String>) -> Result<Recipe> {
        let template = self.recipes.get(recipe_id).ok_or_else(|| {
            OdavlError::config_field(format!("unknown recipe id '{recipe_id}'"), "recipes")
        })?;

        let actions = template
            .actions
            .iter()
            .map(|action| RecipeAction {
                kind: action.kind,
                files: files.clone(),
                params: action.params.clone(),
            })
            .collect();

        Ok(Recipe {
            id: template.id.clone(),
            name: template.name.clone(),
            actions,
        })
    }
}

fn standard_recipes() -> Vec<(Recipe, IssueCategory)> {
    fn recipe(id: &str, name: &str, kind: ActionKind) -> Recipe {
        Recipe {
            id: id.to_string(),
            name: name.to_string(),
            actions: vec![RecipeAction {
                kind,
                files: Vec::new(),
                params: IndexMap::new(),
            }],
        }
    }

    vec![
        (
            recipe("organize-imports", "Organize imports", ActionKind::RewriteImports),
            IssueCategory::Import,
        ),
        (
            recipe("apply-compiler-fix", "Apply compiler fix", ActionKind::PatchFile),
            IssueCategory::Syntax,
        ),
        (
            recipe("repair-build-config", "Repair build config", ActionKind::PatchFile),
            IssueCategory::Build,
        ),
        (
            recipe("fix-security", "Redact inline secrets", ActionKind::RedactInlineSecrets),
            IssueCategory::Security,
        ),
        (
            recipe(
                "strip-debug-logging",
                "Strip debug logging",
                ActionKind::StripDebugStatements,
            ),
            IssueCategory::Performance,
        ),
        (
            recipe(
                "break-dependency-cycle",
                "Break dependency cycle",
                ActionKind::RewriteImports,
            ),
            IssueCategory::Circular,
        ),
        (
            recipe(
                "enforce-module-boundary",
                "Enforce module boundary",
                ActionKind::PatchFile,
            ),
            IssueCategory::Isolation,
        ),
        (
            recipe("harden-network-call", "Harden network call", ActionKind::PatchFile),
            IssueCategory::Network,
        ),
        (
            recipe(
                "pin-dependency-versions",
                "Pin dependency versions",
                ActionKind::PinDependencyVersions,
            ),
            IssueCategory::PackageDrift,
        ),
    ]
}
