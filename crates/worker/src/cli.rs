//! Command-line arguments for one generation run.

use clap::Parser;
use ocforge_core::generation::{GenerationParams, JobMode};
use ocforge_core::job_session::SessionFlow;
use ocforge_core::types::CharacterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FlowArg {
    /// New character: the first full-body portrait becomes primary and
    /// chains an avatar.
    Creation,
    /// Existing character: the primary portrait only fills a gap.
    Editing,
}

impl From<FlowArg> for SessionFlow {
    fn from(flow: FlowArg) -> Self {
        match flow {
            FlowArg::Creation => SessionFlow::Creation,
            FlowArg::Editing => SessionFlow::Editing,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "ocforge-worker",
    version,
    about = "Generate one character image and apply it to the character"
)]
pub struct Cli {
    /// Character to generate for.
    pub character_id: CharacterId,
    /// avatar, full_body, design_sheet, background or event.
    pub mode: JobMode,
    #[arg(long, value_enum, default_value = "editing")]
    pub flow: FlowArg,
    #[arg(long)]
    pub prompt: Option<String>,
    /// Conditioning image URL or managed image id.
    #[arg(long)]
    pub reference: Option<String>,
    #[arg(long)]
    pub art_style: Option<String>,
    #[arg(long)]
    pub aspect_ratio: Option<String>,
    /// Scene description for backgrounds.
    #[arg(long)]
    pub scene: Option<String>,
    /// Prompt template overriding the configured one.
    #[arg(long)]
    pub template: Option<String>,
    /// Character profile value, `key=value`. Repeatable.
    #[arg(long = "profile", value_parser = parse_key_value)]
    pub profile: Vec<(String, String)>,
    /// Extra template value, `key=value`. Repeatable.
    #[arg(long = "context", value_parser = parse_key_value)]
    pub context: Vec<(String, String)>,
}

impl Cli {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            prompt: self.prompt.clone(),
            reference_url: self.reference.clone(),
            art_style: self.art_style.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            scene_description: self.scene.clone(),
            template: self.template.clone(),
            profile: self.profile.iter().cloned().collect(),
            context: self.context.iter().cloned().collect(),
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
