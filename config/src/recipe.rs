//! Loading the build recipe from a build context.

use std::fs;
use std::io;
use std::path::Path;

use kiln_types::Recipe;

use crate::ConfigError;

pub const RECIPE_FILE_NAME: &str = "Kilnfile.toml";

/// Load `<context>/Kilnfile.toml`. A missing file means an all-default recipe.
pub fn load_recipe(context: &Path) -> Result<Recipe, ConfigError> {
    let path = context.join(RECIPE_FILE_NAME);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!(
                context = %context.display(),
                "No {RECIPE_FILE_NAME} found; using the default recipe"
            );
            return Ok(Recipe::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    parse_recipe(&content).map_err(|source| ConfigError::Parse { path, source })
}

pub fn parse_recipe(content: &str) -> Result<Recipe, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::{RECIPE_FILE_NAME, load_recipe, parse_recipe};
    use crate::ConfigError;

    #[test]
    fn missing_recipe_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = load_recipe(dir.path()).unwrap();
        assert_eq!(recipe.runtime().to_string(), "python:3.11-slim");
    }

    #[test]
    fn parses_full_recipe() {
        let recipe = parse_recipe(
            r#"
name = "bot"
workdir = "/app"

[runtime]
id = "python"
tag = "3.11-slim"

[system]
packages = ["build-essential", "libpq-dev"]

[dependencies]
manifest = "requirements.txt"
docs = ["README.md"]

[source]
path = "bot"
exclude = ["__pycache__", "*.pyc"]

[config_template]
path = ".env.example"

[entrypoint]
command = ["python", "-m", "bot.main"]
env = { PYTHONUNBUFFERED = "1" }

[commands]
worker = ["python", "-m", "bot.worker"]
"#,
        )
        .unwrap();
        assert_eq!(recipe.system().packages.len(), 2);
        assert_eq!(recipe.source().exclude, ["__pycache__", "*.pyc"]);
        assert_eq!(
            recipe.entrypoint().env().get("PYTHONUNBUFFERED").map(String::as_str),
            Some("1")
        );
        assert!(recipe.commands().contains_key("worker"));
    }

    #[test]
    fn invalid_recipe_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECIPE_FILE_NAME), "workdir = \"app\"\n").unwrap();
        let err = load_recipe(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(RECIPE_FILE_NAME), "{err}");
    }
}
