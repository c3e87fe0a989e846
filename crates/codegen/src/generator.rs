//! Template-backed source generator.
//!
//! Renders a [`BotBlueprint`] into a complete, buildable source tree for the
//! selected framework. Templates are embedded at compile time so the binary
//! has no runtime asset directory to locate.

use async_trait::async_trait;
use tera::Tera;

use botforge_core::{DeploymentIntent, Framework, GenerateError, GeneratedSource, SourceGenerator};

use crate::analyzer::{analyze, BotBlueprint};
use crate::parser::parse_requirements;

const TEMPLATES: &[(&str, &str)] = &[
    ("python_main", include_str!("templates/python_main.py.tera")),
    ("python_handlers", include_str!("templates/python_handlers.py.tera")),
    ("python_requirements", include_str!("templates/python_requirements.txt.tera")),
    ("python_dockerfile", include_str!("templates/python_dockerfile.tera")),
    ("node_main", include_str!("templates/node_main.js.tera")),
    ("node_package", include_str!("templates/node_package.json.tera")),
    ("node_dockerfile", include_str!("templates/node_dockerfile.tera")),
    ("env_file", include_str!("templates/env_file.tera")),
    ("readme", include_str!("templates/readme.md.tera")),
];

/// Generates bot sources from the embedded template set.
pub struct TemplateGenerator {
    tera: Tera,
}

impl TemplateGenerator {
    pub fn new() -> Result<Self, GenerateError> {
        let mut tera = Tera::default();
        for (name, body) in TEMPLATES {
            tera.add_raw_template(name, body)
                .map_err(|error| GenerateError::Render(format!("template `{name}`: {error}")))?;
        }
        Ok(Self { tera })
    }

    fn render(&self, name: &str, context: &tera::Context) -> Result<String, GenerateError> {
        let rendered = self
            .tera
            .render(name, context)
            .map_err(|error| GenerateError::Render(format!("template `{name}`: {error}")))?;
        if rendered.trim().is_empty() {
            return Err(GenerateError::Incomplete(format!("template `{name}` rendered nothing")));
        }
        Ok(rendered)
    }

    fn render_tree(&self, blueprint: &BotBlueprint) -> Result<GeneratedSource, GenerateError> {
        let context = tera::Context::from_serialize(blueprint)
            .map_err(|error| GenerateError::Render(error.to_string()))?;

        let mut source = GeneratedSource::default();
        match blueprint.framework {
            Framework::Python => {
                source.insert("Dockerfile", self.render("python_dockerfile", &context)?);
                source.insert("requirements.txt", self.render("python_requirements", &context)?);
                source.insert("bot/__init__.py", String::new());
                source.insert("bot/main.py", self.render("python_main", &context)?);
                source.insert("bot/handlers.py", self.render("python_handlers", &context)?);
            }
            Framework::Nodejs => {
                source.insert("Dockerfile", self.render("node_dockerfile", &context)?);
                source.insert("package.json", self.render("node_package", &context)?);
                source.insert("src/bot.js", self.render("node_main", &context)?);
            }
        }
        source.insert(".env", self.render("env_file", &context)?);
        source.insert("README.md", self.render("readme", &context)?);
        Ok(source)
    }
}

#[async_trait]
impl SourceGenerator for TemplateGenerator {
    async fn generate(&self, intent: &DeploymentIntent) -> Result<GeneratedSource, GenerateError> {
        let requirements = parse_requirements(&intent.description);
        let blueprint =
            analyze(&intent.name, &intent.description, intent.framework, &requirements);
        let source = self.render_tree(&blueprint)?;
        if source.is_empty() {
            return Err(GenerateError::Incomplete("no files were rendered".into()));
        }
        Ok(source)
    }
}
