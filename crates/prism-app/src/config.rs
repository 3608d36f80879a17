// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use prism_render::{PipelineKind, RenderOptions};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "prism.toml")]
    pub config: PathBuf,

    /// Initial pipeline: phong | unlit | wireframe
    #[arg(long, value_parser = parse_pipeline)]
    pub pipeline: Option<PipelineKind>,

    /// Start with vsync off (immediate presentation)
    #[arg(long)]
    pub no_vsync: bool,
}

fn parse_pipeline(s: &str) -> Result<PipelineKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "phong" => Ok(PipelineKind::Phong),
        "unlit" => Ok(PipelineKind::Unlit),
        "wireframe" => Ok(PipelineKind::Wireframe),
        other => Err(format!("unknown pipeline '{other}' (phong | unlit | wireframe)")),
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "prism".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub vsync: bool,
    pub pipeline: PipelineKind,
    pub clear_color: [f32; 4],
    pub max_msaa_samples: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderOptions::default();
        Self {
            vsync: d.vsync,
            pipeline: d.pipeline,
            clear_color: d.clear_color,
            max_msaa_samples: d.max_msaa_samples,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

pub fn parse_cfg(src: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(src)
}

/// Missing or broken files fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// File values, overridden by the command line.
pub fn render_options(cfg: &AppCfg, args: &Args) -> RenderOptions {
    RenderOptions {
        vsync: cfg.render.vsync && !args.no_vsync,
        pipeline: args.pipeline.unwrap_or(cfg.render.pipeline),
        clear_color: cfg.render.clear_color,
        max_msaa_samples: cfg.render.max_msaa_samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            pipeline = "wireframe"
            max_msaa_samples = 4
            "#,
        )
        .expect("valid toml");
        assert_eq!(cfg.render.pipeline, PipelineKind::Wireframe);
        assert_eq!(cfg.render.max_msaa_samples, 4);
        assert!(cfg.render.vsync);
        assert_eq!(cfg.window.title, "prism");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
    }

    #[test]
    fn unknown_pipeline_is_rejected() {
        assert!(parse_cfg("[render]\npipeline = \"raytraced\"").is_err());
        assert!(parse_pipeline("raytraced").is_err());
        assert_eq!(parse_pipeline("Unlit"), Ok(PipelineKind::Unlit));
    }

    #[test]
    fn cli_overrides_file() {
        let cfg = parse_cfg("[render]\nvsync = true\npipeline = \"phong\"").expect("valid toml");
        let args = Args::parse_from(["prism", "--no-vsync", "--pipeline", "unlit"]);
        let opts = render_options(&cfg, &args);
        assert!(!opts.vsync);
        assert_eq!(opts.pipeline, PipelineKind::Unlit);

        let args = Args::parse_from(["prism"]);
        let opts = render_options(&cfg, &args);
        assert!(opts.vsync);
        assert_eq!(opts.pipeline, PipelineKind::Phong);
        assert_eq!(args.config, PathBuf::from("prism.toml"));
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("/definitely/not/here/prism.toml"));
        assert_eq!(cfg.render.clear_color, RenderOptions::default().clear_color);
    }
}
