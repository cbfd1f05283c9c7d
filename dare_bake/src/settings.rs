use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

pub const USAGE: &str = "\
usage:
    dare_bake bake <scene.gltf|glb> <out.bundle> [--environment <file.hdr>] [--no-gpu] [--face-size N]
                   [--irradiance-size N] [--max-pending N] [--validation] [--verbose]
    dare_bake inspect <bundle> [--verbose]";

#[derive(Debug, Clone, PartialEq)]
pub struct BakeSettings {
    pub scene: PathBuf,
    pub output: PathBuf,
    /// Equirectangular HDR image baked into the bundle's only environment
    pub environment: Option<PathBuf>,
    /// Generate mip chains on the device. Textures keep a single level without it.
    pub use_gpu: bool,
    /// Edge length of each skybox face
    pub face_size: u32,
    /// Edge length of each diffuse irradiance face
    pub irradiance_size: u32,
    pub max_pending: usize,
    pub validation: bool,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            scene: PathBuf::new(),
            output: PathBuf::new(),
            environment: None,
            use_gpu: true,
            face_size: 512,
            irradiance_size: 32,
            max_pending: 16,
            validation: false,
        }
    }
}

impl BakeSettings {
    pub fn new(scene: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            scene: scene.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn set_environment(mut self, environment: impl Into<PathBuf>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn set_use_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    pub fn set_face_size(mut self, face_size: u32) -> Self {
        self.face_size = face_size;
        self
    }

    pub fn set_irradiance_size(mut self, irradiance_size: u32) -> Self {
        self.irradiance_size = irradiance_size;
        self
    }

    pub fn set_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn set_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Value of a numeric option, which must be above zero
fn positive<T>(option: &str, value: Option<String>) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.ok_or_else(|| anyhow!("{} expects a number", option))?;
    let parsed: T = value
        .parse()
        .with_context(|| format!("invalid value {:?} for {}", value, option))?;
    if parsed <= T::default() {
        bail!("{} must be positive", option);
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Bake(BakeSettings),
    Inspect(PathBuf),
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments {
    pub command: Command,
    pub verbose: bool,
}

impl Arguments {
    /// Parses everything after the program name
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let command = args.next().ok_or_else(|| anyhow!("missing command"))?;

        let mut positional: Vec<String> = Vec::new();
        let mut verbose = false;
        let mut environment: Option<PathBuf> = None;
        let mut use_gpu = true;
        let mut validation = false;
        let mut face_size: Option<u32> = None;
        let mut irradiance_size: Option<u32> = None;
        let mut max_pending: Option<usize> = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--verbose" | "-v" => verbose = true,
                "--no-gpu" => use_gpu = false,
                "--validation" => validation = true,
                "--environment" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--environment expects a path"))?;
                    environment = Some(PathBuf::from(path));
                }
                "--face-size" => face_size = Some(positive(&arg, args.next())?),
                "--irradiance-size" => irradiance_size = Some(positive(&arg, args.next())?),
                "--max-pending" => max_pending = Some(positive(&arg, args.next())?),
                flag if flag.starts_with("--") => bail!("unknown option {}", flag),
                _ => positional.push(arg),
            }
        }

        let command = match (command.as_str(), positional.as_slice()) {
            ("bake", [scene, output]) => {
                let mut settings = BakeSettings::new(scene, output)
                    .set_use_gpu(use_gpu)
                    .set_validation(validation);
                if let Some(environment) = environment {
                    settings = settings.set_environment(environment);
                }
                if let Some(face_size) = face_size {
                    settings = settings.set_face_size(face_size);
                }
                if let Some(irradiance_size) = irradiance_size {
                    settings = settings.set_irradiance_size(irradiance_size);
                }
                if let Some(max_pending) = max_pending {
                    settings = settings.set_max_pending(max_pending);
                }
                Command::Bake(settings)
            }
            ("inspect", [bundle]) => Command::Inspect(PathBuf::from(bundle)),
            ("bake", _) => bail!("bake expects a scene and an output path"),
            ("inspect", _) => bail!("inspect expects a bundle path"),
            (other, _) => bail!("unknown command {}", other),
        };
        Ok(Self { command, verbose })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bake() {
        let args = Arguments::parse([
            "bake",
            "scene.glb",
            "scene.bundle",
            "--environment",
            "sky.hdr",
            "--face-size",
            "128",
            "--no-gpu",
            "--max-pending",
            "4",
        ])
        .unwrap();
        assert!(!args.verbose);
        assert_eq!(
            args.command,
            Command::Bake(
                BakeSettings::new("scene.glb", "scene.bundle")
                    .set_environment("sky.hdr")
                    .set_face_size(128)
                    .set_use_gpu(false)
                    .set_max_pending(4)
            )
        );
    }

    #[test]
    fn test_parse_inspect() {
        let args = Arguments::parse(["inspect", "--verbose", "scene.bundle"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.command, Command::Inspect(PathBuf::from("scene.bundle")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Arguments::parse(Vec::<String>::new()).is_err());
        assert!(Arguments::parse(["bake", "scene.glb"]).is_err());
        assert!(Arguments::parse(["bake", "a", "b", "--face-size", "0"]).is_err());
        assert!(Arguments::parse(["bake", "a", "b", "--face-size"]).is_err());
        assert!(Arguments::parse(["bake", "a", "b", "--irradiance-size", "x"]).is_err());
        assert!(Arguments::parse(["inspect", "a", "--colour"]).is_err());
        assert!(Arguments::parse(["render", "a"]).is_err());
    }
}
