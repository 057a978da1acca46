//! Project structure detection.
//!
//! Walks the project tree, classifies Python sources by convention, and
//! scores entry-point candidates. Everything downstream trusts the resulting
//! [`ProjectModel`], so detection fails loudly rather than guessing: a tree
//! with no plausible application object is a [`HealError::DetectionFailure`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::error::{HealError, Result};
use crate::domain::model::{
    confidence, ArchitecturePattern, AuthMechanism, ConfidenceMap, EntryPoint, EntryPointKind,
    ProjectModel,
};

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".github",
    ".webmend",
    "venv",
    "env",
    ".venv",
    ".env",
    "__pycache__",
    "node_modules",
    "migrations",
    "tests",
];

/// File names where a module-scope `Flask(...)` assignment is conventional.
const CONVENTIONAL_ENTRY_FILES: &[&str] = &["app.py", "wsgi.py", "main.py", "application.py", "run.py"];

static FACTORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*def\s+(create_app|make_app|get_app|setup_app|init_app)\s*\(")
        .expect("valid factory pattern")
});

static APP_INSTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\w+)\s*=\s*(?:flask\.)?Flask\(").expect("valid app instance pattern")
});

fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

#[derive(Debug)]
struct EntryCandidate {
    entry: EntryPoint,
    score: f64,
}

/// Detects the structural model of a project tree.
#[derive(Debug)]
pub struct Detector {
    root: PathBuf,
    min_confidence: f64,
}

impl Detector {
    pub fn new(root: impl Into<PathBuf>, min_confidence: f64) -> Self {
        Self {
            root: root.into(),
            min_confidence,
        }
    }

    /// Run detection over the tree and assemble the model.
    pub fn detect(&self) -> Result<ProjectModel> {
        if !self.root.is_dir() {
            return Err(HealError::DetectionFailure {
                root: self.root.clone(),
                reason: "root path is not a directory".to_string(),
            });
        }

        let mut walk = Walk::default();
        self.walk_dir(&self.root, &mut walk)?;

        if walk.python_files.is_empty() {
            return Err(HealError::DetectionFailure {
                root: self.root.clone(),
                reason: "no Python sources found".to_string(),
            });
        }

        let mut conf = ConfidenceMap::new();
        let mut candidates = Vec::new();
        let mut route_modules = BTreeSet::new();
        let mut model_modules = BTreeSet::new();
        let mut auth: Option<AuthMechanism> = None;
        let mut saw_blueprint_usage = false;

        for rel in &walk.python_files {
            let content = match fs::read_to_string(self.root.join(rel)) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %rel.display(), error = %e, "skipping unreadable source");
                    continue;
                }
            };

            if !mentions_flask(&content) {
                continue;
            }

            if content.contains(".route(") || content.contains("@app.") || content.contains("Blueprint(")
            {
                route_modules.insert(rel.clone());
                conf.raise(confidence::ROUTE_MODULES, 0.8);
            }
            if content.contains("Blueprint(") {
                saw_blueprint_usage = true;
            }
            if content.contains("db.Model") || content.contains("SQLAlchemy") {
                model_modules.insert(rel.clone());
                conf.raise(confidence::MODEL_MODULES, 0.8);
            }

            if let Some(candidate) = self.entry_candidate(rel, &content) {
                debug!(
                    file = %rel.display(),
                    symbol = %candidate.entry.symbol,
                    score = candidate.score,
                    "entry-point candidate"
                );
                candidates.push(candidate);
            }

            auth = strongest_auth(auth, detect_auth(&content));
        }

        candidates.retain(|c| c.score >= self.min_confidence);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.file.cmp(&b.entry.file))
        });

        let best = candidates.into_iter().next().ok_or_else(|| HealError::DetectionFailure {
            root: self.root.clone(),
            reason: "no application entry point found".to_string(),
        })?;
        conf.raise(confidence::ENTRY_POINT, best.score);

        let architecture_pattern = match best.entry.kind {
            EntryPointKind::FactoryFunction => ArchitecturePattern::Factory,
            EntryPointKind::AppInstance if saw_blueprint_usage => ArchitecturePattern::Blueprint,
            EntryPointKind::AppInstance => ArchitecturePattern::Monolithic,
        };

        if !walk.template_dirs.is_empty() {
            conf.raise(confidence::TEMPLATE_DIRS, 0.9);
        }
        if auth.is_some() {
            conf.raise(confidence::AUTH_MECHANISM, 0.7);
        }

        let model = ProjectModel {
            root: self.root.clone(),
            entry_point: best.entry,
            architecture_pattern,
            route_modules,
            template_dirs: walk.template_dirs,
            static_dirs: walk.static_dirs,
            model_modules,
            migration_dir: walk.migration_dir,
            auth_mechanism: auth,
            confidence: conf,
        };

        info!(
            root = %model.root.display(),
            entry = %model.entry_point.file.display(),
            pattern = ?model.architecture_pattern,
            routes = model.route_modules.len(),
            models = model.model_modules.len(),
            "project structure detected"
        );
        Ok(model)
    }

    fn walk_dir(&self, dir: &Path, walk: &mut Walk) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                let rel = self.relative(&path);
                match name.as_str() {
                    "templates" => {
                        walk.template_dirs.insert(rel.clone());
                    }
                    "static" => {
                        walk.static_dirs.insert(rel.clone());
                    }
                    "migrations" => {
                        walk.migration_dir.get_or_insert(rel.clone());
                    }
                    _ => {}
                }
                if SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                self.walk_dir(&path, walk)?;
            } else if file_type.is_file() && name.ends_with(".py") {
                walk.python_files.push(self.relative(&path));
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    fn entry_candidate(&self, rel: &Path, content: &str) -> Option<EntryCandidate> {
        if let Some(m) = FACTORY_RE.captures(content) {
            let whole = m.get(0)?;
            return Some(EntryCandidate {
                entry: EntryPoint {
                    file: rel.to_path_buf(),
                    kind: EntryPointKind::FactoryFunction,
                    symbol: m.get(1)?.as_str().to_string(),
                    line: line_of(content, whole.start()),
                },
                score: 0.9,
            });
        }
        if let Some(m) = APP_INSTANCE_RE.captures(content) {
            let whole = m.get(0)?;
            let file_name = rel.file_name()?.to_string_lossy();
            let score = if CONVENTIONAL_ENTRY_FILES.contains(&file_name.as_ref()) {
                0.7
            } else {
                0.5
            };
            return Some(EntryCandidate {
                entry: EntryPoint {
                    file: rel.to_path_buf(),
                    kind: EntryPointKind::AppInstance,
                    symbol: m.get(1)?.as_str().to_string(),
                    line: line_of(content, whole.start()),
                },
                score,
            });
        }
        None
    }
}

fn mentions_flask(content: &str) -> bool {
    content.contains("from flask import")
        || content.contains("import flask")
        || content.contains("from flask.")
        || content.contains("from flask_")
}

fn detect_auth(content: &str) -> Option<AuthMechanism> {
    if content.contains("flask_login")
        || content.contains("LoginManager")
        || content.contains("current_user")
    {
        Some(AuthMechanism::FlaskLogin)
    } else if content.contains("jwt") || content.contains("JWT") {
        Some(AuthMechanism::Jwt)
    } else if content.contains("session[") {
        Some(AuthMechanism::Session)
    } else {
        None
    }
}

/// Prefer the most specific mechanism seen anywhere in the tree.
fn strongest_auth(a: Option<AuthMechanism>, b: Option<AuthMechanism>) -> Option<AuthMechanism> {
    fn rank(m: AuthMechanism) -> u8 {
        match m {
            AuthMechanism::FlaskLogin => 3,
            AuthMechanism::Jwt => 2,
            AuthMechanism::Session => 1,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => Some(if rank(x) >= rank(y) { x } else { y }),
        (x, None) => x,
        (None, y) => y,
    }
}

#[derive(Debug, Default)]
struct Walk {
    python_files: Vec<PathBuf>,
    template_dirs: BTreeSet<PathBuf>,
    static_dirs: BTreeSet<PathBuf>,
    migration_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &TempDir, rel: &str, content: &str) {
        let path = root.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn factory_beats_app_instance() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app/__init__.py",
            "from flask import Flask\n\ndef create_app():\n    app = Flask(__name__)\n    return app\n",
        );
        write(
            &root,
            "run.py",
            "from flask import Flask\napp = Flask(__name__)\n",
        );

        let model = Detector::new(root.path(), 0.3).detect().unwrap();
        assert_eq!(model.entry_point.kind, EntryPointKind::FactoryFunction);
        assert_eq!(model.entry_point.symbol, "create_app");
        assert_eq!(model.architecture_pattern, ArchitecturePattern::Factory);
    }

    #[test]
    fn blueprint_pattern_detected() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask\nfrom views import bp\napp = Flask(__name__)\napp.register_blueprint(bp)\n",
        );
        write(
            &root,
            "views.py",
            "from flask import Blueprint\nbp = Blueprint('views', __name__)\n\n@bp.route('/')\ndef index():\n    return 'ok'\n",
        );

        let model = Detector::new(root.path(), 0.3).detect().unwrap();
        assert_eq!(model.architecture_pattern, ArchitecturePattern::Blueprint);
        assert!(model.route_modules.contains(&PathBuf::from("views.py")));
    }

    #[test]
    fn empty_tree_fails_detection() {
        let root = TempDir::new().unwrap();
        let err = Detector::new(root.path(), 0.3).detect().unwrap_err();
        assert!(matches!(err, HealError::DetectionFailure { .. }));
    }

    #[test]
    fn non_flask_python_fails_detection() {
        let root = TempDir::new().unwrap();
        write(&root, "script.py", "print('hello')\n");
        let err = Detector::new(root.path(), 0.3).detect().unwrap_err();
        assert!(matches!(err, HealError::DetectionFailure { .. }));
    }

    #[test]
    fn template_and_migration_dirs_recorded() {
        let root = TempDir::new().unwrap();
        write(&root, "app.py", "from flask import Flask\napp = Flask(__name__)\n");
        write(&root, "templates/index.html", "<html></html>");
        write(&root, "static/style.css", "body {}");
        write(&root, "migrations/versions/0001_init.py", "pass\n");

        let model = Detector::new(root.path(), 0.3).detect().unwrap();
        assert!(model.template_dirs.contains(&PathBuf::from("templates")));
        assert!(model.static_dirs.contains(&PathBuf::from("static")));
        assert_eq!(model.migration_dir, Some(PathBuf::from("migrations")));
    }

    #[test]
    fn flask_login_detected_as_auth() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask\nfrom flask_login import LoginManager\napp = Flask(__name__)\n",
        );
        let model = Detector::new(root.path(), 0.3).detect().unwrap();
        assert_eq!(model.auth_mechanism, Some(AuthMechanism::FlaskLogin));
    }

    #[test]
    fn low_confidence_candidates_excluded() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "helper.py",
            "from flask import Flask\nx = Flask(__name__)\n",
        );
        // A 0.5-scored oddly-named candidate fails a 0.6 floor.
        let err = Detector::new(root.path(), 0.6).detect().unwrap_err();
        assert!(matches!(err, HealError::DetectionFailure { .. }));
    }
}
