//! Mod loader installers, unpacking of their jar and execution of their processors.
//!
//! An installer jar embeds an install profile listing the processors to run once the
//! libraries are downloaded. Each processor is an external Java program, identified by
//! a maven coordinate, called with arguments templated from the profile's data entries.

pub(crate) mod serde;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::process::Stdio;
use std::env;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::Command;

use tracing::{debug, info};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::manifest::{self, Library, ManifestResolver};
use crate::download::check_file;
use crate::serde::{format_hex_bytes, parse_hex_bytes};
use crate::task::CancelToken;
use crate::path::{check_relative_path, PathExt};
use crate::maven::Gav;


/// Name of the install profile file at the root of installer jars.
pub const INSTALL_PROFILE_FILE: &str = "install_profile.json";

/// Number of stderr lines kept for the error of a failed processor.
const STDERR_TAIL_LEN: usize = 20;

/// The side of processors that is run by the installer.
const CLIENT_SIDE: &str = "client";

/// An install profile, with its data entries resolved for the client side.
#[derive(Debug, Clone)]
pub struct InstallProfile {
    /// The identifier of the version being installed.
    pub version: String,
    /// The game version this profile applies to.
    pub minecraft: String,
    /// Path of the version manifest within the installer.
    pub json: String,
    pub path: Option<Gav>,
    /// Raw client values of data entries.
    pub data: HashMap<String, String>,
    pub steps: Vec<ProcessorStep>,
    libraries: Vec<crate::manifest::serde::VersionLibrary>,
}

/// One step of the installer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorStep {
    /// The jar with the main class to run.
    pub jar: Gav,
    pub classpath: Vec<Gav>,
    /// Argument templates.
    pub args: Vec<String>,
    /// Sides on which this step should run, all sides if none.
    pub sides: Option<Vec<String>>,
    /// Output file templates with their expected SHA-1 templates, sorted.
    pub outputs: Vec<(String, String)>,
}

impl ProcessorStep {

    /// Return true if this step should run for the client side.
    pub fn is_client(&self) -> bool {
        self.sides.as_ref()
            .is_none_or(|sides| sides.iter().any(|side| side == CLIENT_SIDE))
    }

}

impl InstallProfile {

    /// Parse an install profile from its raw JSON.
    pub fn parse(raw: &[u8], origin: &str) -> Result<Self> {

        let mut deserializer = serde_json::Deserializer::from_slice(raw);
        let profile: serde::InstallProfile = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::Format { origin: origin.into(), message: e.to_string() })?;

        Ok(Self {
            version: profile.version,
            minecraft: profile.minecraft,
            json: profile.json,
            path: profile.path,
            data: profile.data.into_iter()
                .map(|(key, value)| (key, value.client))
                .collect(),
            steps: profile.processors.into_iter()
                .map(|processor| {
                    let mut outputs = processor.outputs.into_iter().collect::<Vec<_>>();
                    outputs.sort();
                    ProcessorStep {
                        jar: processor.jar,
                        classpath: processor.classpath,
                        args: processor.args,
                        sides: processor.sides,
                        outputs,
                    }
                })
                .collect(),
            libraries: profile.libraries,
        })

    }

    /// Resolve the libraries required by the processors of this profile.
    pub fn libraries(&self, resolver: &ManifestResolver) -> manifest::Result<Vec<Library>> {
        self.libraries.iter()
            .map(|lib| resolver.resolve_library(lib, &self.version))
            .collect()
    }

    /// Return the steps to run on the client side.
    pub fn client_steps(&self) -> impl Iterator<Item = &ProcessorStep> {
        self.steps.iter().filter(|step| step.is_client())
    }

}

/// Unpack the given installer jar into the work directory, then copy its embedded maven
/// repository into the libraries directory and write its version manifest to
/// `<versions_dir>/<version>/<version>.json`. The install profile is returned.
///
/// Any previous content of the work directory is removed first.
pub fn unpack_installer(installer_file: &Path, work_dir: &Path, libraries_dir: &Path, versions_dir: &Path) -> Result<InstallProfile> {

    match fs::remove_dir_all(work_dir) {
        Ok(()) => debug!(dir = %work_dir.display(), "cleared installer work directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => return Err(Error::new_io_file(e, work_dir)),
    }

    let reader = File::open(installer_file)
        .map(BufReader::new)
        .map_err(|e| Error::new_io_file(e, installer_file))?;

    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::new_zip_file(e, installer_file))?;

    for i in 0..archive.len() {

        let mut file = archive.by_index(i)
            .map_err(|e| Error::new_zip_file(e, installer_file))?;

        let Some(file_path) = file.enclosed_name() else {
            continue;
        };

        let dst_file = work_dir.join(file_path);
        if file.is_dir() {
            fs::create_dir_all(&dst_file)
                .map_err(|e| Error::new_io_file(e, &dst_file))?;
            continue;
        }

        if let Some(parent) = dst_file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::new_io_file(e, parent))?;
        }

        let mut writer = File::create(&dst_file)
            .map_err(|e| Error::new_io_file(e, &dst_file))?;
        io::copy(&mut file, &mut writer)
            .map_err(|e| Error::new_io_file(e, &dst_file))?;

    }

    debug!(file = %installer_file.display(), dir = %work_dir.display(), "unpacked installer");

    let profile_file = work_dir.join(INSTALL_PROFILE_FILE);
    let raw = fs::read(&profile_file)
        .map_err(|e| Error::new_io_file(e, &profile_file))?;
    let profile = InstallProfile::parse(&raw, &profile_file.display().to_string())?;

    let maven_dir = work_dir.join("maven");
    if maven_dir.is_dir() {
        copy_tree(&maven_dir, libraries_dir)?;
    }

    let json_path = check_relative_path(profile.json.trim_start_matches('/'))
        .ok_or_else(|| Error::InvalidPath { path: profile.json.clone() })?;
    let src_file = work_dir.join(json_path);
    let version_dir = versions_dir.join(&profile.version);
    let dst_file = version_dir.join_with_extension(&profile.version, "json");

    fs::create_dir_all(&version_dir)
        .map_err(|e| Error::new_io_file(e, &version_dir))?;
    fs::copy(&src_file, &dst_file)
        .map_err(|e| Error::new_io_file(e, &src_file))?;

    Ok(profile)

}

fn copy_tree(src_dir: &Path, dst_dir: &Path) -> Result<()> {

    fs::create_dir_all(dst_dir)
        .map_err(|e| Error::new_io_file(e, dst_dir))?;

    let entries = fs::read_dir(src_dir)
        .map_err(|e| Error::new_io_file(e, src_dir))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::new_io_file(e, src_dir))?;
        let src_path = entry.path();
        let dst_path = dst_dir.join(entry.file_name());
        if src_path.is_dir() {
            copy_tree(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .map_err(|e| Error::new_io_file(e, &src_path))?;
        }
    }

    Ok(())

}

/// Paths used by processors and their values.
#[derive(Debug, Clone)]
pub struct ProcessorEnv {
    /// The Java executable used to run processors.
    pub java_file: PathBuf,
    /// The main directory of the installation, `{ROOT}`.
    pub root_dir: PathBuf,
    pub libraries_dir: PathBuf,
    /// The installer jar, `{INSTALLER}`.
    pub installer_file: PathBuf,
    /// Where the installer has been unpacked, processors run in it.
    pub installer_dir: PathBuf,
    /// The client jar of the game version, `{MINECRAFT_JAR}`.
    pub minecraft_jar: PathBuf,
}

impl ProcessorEnv {

    fn library_file(&self, gav: &Gav) -> PathBuf {
        self.libraries_dir.join(gav.file())
    }

    /// Resolve a raw data value: `[coordinate]` is the path of a library, `'literal'`
    /// has its quotes stripped, `/path` is relative to the unpacked installer and
    /// anything else is unchanged.
    pub fn resolve_value(&self, raw: &str) -> Result<String> {

        if let Some(gav) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let gav = gav.parse::<Gav>()
                .map_err(|()| Error::InvalidPath { path: raw.to_string() })?;
            Ok(self.library_file(&gav).display().to_string())
        } else if let Some(literal) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            Ok(literal.to_string())
        } else if let Some(path) = raw.strip_prefix('/') {
            let path = check_relative_path(path)
                .ok_or_else(|| Error::InvalidPath { path: raw.to_string() })?;
            Ok(self.installer_dir.join(path).display().to_string())
        } else {
            Ok(raw.to_string())
        }

    }

}

/// The dictionary of values used to substitute `{KEY}` tokens in processor arguments.
#[derive(Debug, Clone, Default)]
pub struct ValueDictionary {
    values: HashMap<String, String>,
}

impl ValueDictionary {

    pub fn new() -> Self {
        Self::default()
    }

    /// Build the dictionary of a profile: its resolved data entries and the built-in
    /// `SIDE`, `MINECRAFT_JAR`, `MINECRAFT_VERSION`, `ROOT`, `INSTALLER` and
    /// `LIBRARY_DIR` entries.
    pub fn from_profile(profile: &InstallProfile, env: &ProcessorEnv) -> Result<Self> {

        let mut dict = Self::new();
        for (key, raw) in &profile.data {
            dict.insert(key, env.resolve_value(raw)?);
        }

        dict.insert("SIDE", CLIENT_SIDE);
        dict.insert("MINECRAFT_JAR", env.minecraft_jar.display().to_string());
        dict.insert("MINECRAFT_VERSION", &profile.minecraft);
        dict.insert("ROOT", env.root_dir.display().to_string());
        dict.insert("INSTALLER", env.installer_file.display().to_string());
        dict.insert("LIBRARY_DIR", env.libraries_dir.display().to_string());

        Ok(dict)

    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Substitute every `{KEY}` token of the template, the unknown key is returned as
    /// error if any.
    pub fn substitute<'t>(&self, template: &'t str) -> std::result::Result<String, &'t str> {

        let mut buf = String::with_capacity(template.len());
        let mut rem = template;

        while let Some(open) = rem.find('{') {
            let Some(close) = rem[open..].find('}') else {
                break;
            };
            let key = &rem[open + 1..open + close];
            let value = self.get(key).ok_or(key)?;
            buf.push_str(&rem[..open]);
            buf.push_str(value);
            rem = &rem[open + close + 1..];
        }

        buf.push_str(rem);
        Ok(buf)

    }

}

/// The outcome of a single processor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// All outputs of the step were already present and valid.
    Skipped,
    Ran,
}

/// Runner of processor steps as external Java processes.
#[derive(Debug, Clone)]
pub struct ExternalProcessorRunner {
    env: ProcessorEnv,
}

impl ExternalProcessorRunner {

    pub fn new(env: ProcessorEnv) -> Self {
        Self { env }
    }

    #[inline]
    pub fn env(&self) -> &ProcessorEnv {
        &self.env
    }

    /// Run all client steps in order, the first failing step aborts the run.
    pub async fn run(&self, steps: &[ProcessorStep], values: &ValueDictionary, cancel: &CancelToken) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            if step.is_client() {
                self.run_step(index, step, values, cancel).await?;
            }
        }
        Ok(())
    }

    /// Run a single step, unless all its declared outputs are already valid.
    pub async fn run_step(&self, index: usize, step: &ProcessorStep, values: &ValueDictionary, cancel: &CancelToken) -> Result<StepOutcome> {

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outputs = self.resolve_outputs(step, values)?;
        if !outputs.is_empty() && check_outputs(outputs.clone()).await?.is_empty() {
            debug!(index, jar = %step.jar, "processor outputs valid, skipped");
            return Ok(StepOutcome::Skipped);
        }

        let jar_file = self.env.library_file(&step.jar);
        let main_class = {
            let jar_file = jar_file.clone();
            let jar = step.jar.clone();
            tokio::task::spawn_blocking(move || read_main_class(&jar_file, &jar))
                .await
                .map_err(|e| Error::Io { error: io::Error::other(e), origin: "read main class".into() })??
        };

        let classpath = env::join_paths(step.classpath.iter()
            .map(|gav| self.env.library_file(gav))
            .chain(std::iter::once(jar_file)))
            .map_err(|_| Error::Classpath { jar: step.jar.clone() })?;

        let mut args = Vec::with_capacity(step.args.len());
        for arg in &step.args {
            if let Some(gav) = arg.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let gav = gav.parse::<Gav>()
                    .map_err(|()| Error::InvalidPath { path: arg.clone() })?;
                args.push(self.env.library_file(&gav).display().to_string());
            } else {
                args.push(values.substitute(arg)
                    .map_err(|key| Error::UnknownKey { key: key.to_string(), jar: step.jar.clone() })?);
            }
        }

        info!(index, jar = %step.jar, main_class = %main_class, "running processor");

        let mut child = Command::new(&self.env.java_file)
            .current_dir(&self.env.installer_dir)
            .arg("-cp")
            .arg(&classpath)
            .arg(&main_class)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::new_io_file(e, &self.env.java_file))?;

        let mut stdout = child.stdout.take().map(|s| PipeLines::new(tokio::io::BufReader::new(s)));
        let mut stderr = child.stderr.take().map(|s| PipeLines::new(tokio::io::BufReader::new(s)));
        let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LEN);

        let status = loop {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => debug!(index, "processor stdout: {line}"),
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => {
                        debug!(index, "processor stderr: {line}");
                        if stderr_tail.len() == STDERR_TAIL_LEN {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                    None => stderr = None,
                },
                status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                    break status.map_err(|e| Error::new_io_file(e, &self.env.java_file))?;
                }
                _ = cancel.cancelled() => {
                    // Killing also waits for the process to exit.
                    let _ = child.kill().await;
                    return Err(Error::Cancelled);
                }
            }
        };

        if !status.success() {
            return Err(Error::ExitStatus {
                index,
                jar: step.jar.clone(),
                code: status.code(),
                stderr: Vec::from(stderr_tail).join("\n"),
            });
        }

        if let Some(file) = check_outputs(outputs).await?.into_iter().next() {
            return Err(Error::OutputMismatch { jar: step.jar.clone(), file });
        }

        Ok(StepOutcome::Ran)

    }

    fn resolve_outputs(&self, step: &ProcessorStep, values: &ValueDictionary) -> Result<Vec<(PathBuf, [u8; 20])>> {

        let unknown_key = |key: &str| Error::UnknownKey { key: key.to_string(), jar: step.jar.clone() };

        step.outputs.iter()
            .map(|(file, sha1)| -> Result<(PathBuf, [u8; 20])> {
                let file = values.substitute(file).map_err(unknown_key)?;
                let sha1 = values.substitute(sha1).map_err(unknown_key)?;
                let sha1 = parse_hex_bytes::<20>(self.env.resolve_value(&sha1)?.as_str())
                    .ok_or_else(|| Error::Format {
                        origin: step.jar.to_string().into(),
                        message: format!("invalid output sha1 for {file}: {sha1}"),
                    })?;
                Ok((PathBuf::from(file), sha1))
            })
            .collect()

    }

}

/// Lines of a child process pipe, decoded lossily so that the pipe is drained to the
/// end whatever the encoding of its output.
struct PipeLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> PipeLines<R> {

    fn new(reader: R) -> Self {
        Self { reader, buf: Vec::new() }
    }

    /// Read the next line, `None` at the end of the stream. Partially read bytes are
    /// kept in the buffer if the future is dropped, so this can be used in `select!`.
    async fn next_line(&mut self) -> Option<String> {

        let eof = match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(len) => len == 0,
            Err(e) => {
                debug!("processor pipe read error: {e}");
                true
            }
        };

        if eof && self.buf.is_empty() {
            return None;
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buf.clear();
        Some(line)

    }

}

async fn next_line<R: AsyncBufRead + Unpin>(pipe: &mut Option<PipeLines<R>>) -> Option<String> {
    match pipe {
        Some(pipe) => pipe.next_line().await,
        None => None,
    }
}

/// Return the output files that are missing or have an invalid hash.
async fn check_outputs(outputs: Vec<(PathBuf, [u8; 20])>) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        let mut invalid = Vec::new();
        for (file, sha1) in outputs {
            if !check_file(&file, None, Some(&sha1)).map_err(|e| Error::new_io_file(e, &file))? {
                debug!(file = %file.display(), sha1 = %format_hex_bytes(&sha1), "invalid processor output");
                invalid.push(file);
            }
        }
        Ok(invalid)
    }).await.map_err(|e| Error::Io { error: io::Error::other(e), origin: "check outputs".into() })?
}

/// Read the `Main-Class` attribute of the manifest of the given jar.
pub fn read_main_class(jar_file: &Path, jar: &Gav) -> Result<String> {

    let reader = File::open(jar_file)
        .map(BufReader::new)
        .map_err(|e| Error::new_io_file(e, jar_file))?;

    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::new_zip_file(e, jar_file))?;

    let mut content = String::new();
    match archive.by_name("META-INF/MANIFEST.MF") {
        Ok(mut file) => {
            file.read_to_string(&mut content)
                .map_err(|_| Error::InvalidJarManifest { jar: jar.clone() })?;
        }
        Err(ZipError::FileNotFound) => return Err(Error::InvalidJarManifest { jar: jar.clone() }),
        Err(e) => return Err(Error::new_zip_file(e, jar_file)),
    }

    parse_main_class(&content)
        .ok_or_else(|| Error::MainClassNotFound { jar: jar.clone() })

}

/// Find the `Main-Class` attribute in a jar manifest, lines starting with a space are
/// continuations of the previous one.
fn parse_main_class(content: &str) -> Option<String> {

    let mut lines = Vec::<String>::new();
    for line in content.lines() {
        if let Some(continuation) = line.strip_prefix(' ')
            && let Some(last) = lines.last_mut() {
            last.push_str(continuation);
        } else {
            lines.push(line.to_string());
        }
    }

    lines.iter()
        .find_map(|line| line.strip_prefix("Main-Class:"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())

}

/// A processor or the installer could not be run.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The install profile is invalid.
    #[error("invalid install profile: {message} @ {origin}")]
    Format {
        origin: Box<str>,
        message: String,
    },
    /// A path in the install profile is invalid or escapes its directory.
    #[error("invalid path: {path}")]
    InvalidPath {
        path: String,
    },
    /// An argument references a key that is not in the value dictionary.
    #[error("unknown key: {key} in processor {jar}")]
    UnknownKey {
        key: String,
        jar: Gav,
    },
    /// The jar of a processor has no manifest or it can't be decoded.
    #[error("missing or invalid jar manifest: {jar}")]
    InvalidJarManifest {
        jar: Gav,
    },
    /// The jar manifest of a processor has no main class.
    #[error("main class not found: {jar}")]
    MainClassNotFound {
        jar: Gav,
    },
    #[error("invalid class path: {jar}")]
    Classpath {
        jar: Gav,
    },
    /// A processor exited with a non-zero code, the last lines of its error stream
    /// are kept.
    #[error("processor {index} ({jar}) exited with code {code:?}: {stderr}")]
    ExitStatus {
        index: usize,
        jar: Gav,
        code: Option<i32>,
        stderr: String,
    },
    /// A processor did not produce the expected output.
    #[error("processor {jar} output mismatch: {}", file.display())]
    OutputMismatch {
        jar: Gav,
        file: PathBuf,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("zip: {error} @ {origin}")]
    Zip {
        #[source]
        error: ZipError,
        origin: Box<str>,
    },
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
}

/// Type alias for a result with the processor error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::Io { error, origin: file.as_ref().display().to_string().into() }
    }

    #[inline]
    pub(crate) fn new_zip_file(error: ZipError, file: impl AsRef<Path>) -> Self {
        Self::Zip { error, origin: file.as_ref().display().to_string().into() }
    }

}


#[cfg(test)]
mod tests {

    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn write_zip(file: &Path, entries: &[(&str, &str)]) {
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        let mut writer = ZipWriter::new(File::create(file).unwrap());
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn env(dir: &Path) -> ProcessorEnv {
        ProcessorEnv {
            java_file: PathBuf::from("java"),
            root_dir: dir.to_path_buf(),
            libraries_dir: dir.join("libraries"),
            installer_file: dir.join("installer.jar"),
            installer_dir: dir.join("work"),
            minecraft_jar: dir.join("versions/1.20.1/1.20.1.jar"),
        }
    }

    #[test]
    fn resolve_values() {
        let env = env(Path::new("/mc"));
        assert_eq!(env.resolve_value("[net.minecraftforge:forge:1.20.1-47.2.0:client]").unwrap(),
            Path::new("/mc/libraries/net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-client.jar").display().to_string());
        assert_eq!(env.resolve_value("'abcdef'").unwrap(), "abcdef");
        assert_eq!(env.resolve_value("/data/client.lzma").unwrap(), Path::new("/mc/work/data/client.lzma").display().to_string());
        assert_eq!(env.resolve_value("raw").unwrap(), "raw");
        assert!(matches!(env.resolve_value("/../evil"), Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn substitute() {
        let mut dict = ValueDictionary::new();
        dict.insert("SIDE", "client");
        dict.insert("ROOT", "/mc");
        assert_eq!(dict.substitute("{ROOT}/libraries/{SIDE}.txt"), Ok("/mc/libraries/client.txt".to_string()));
        assert_eq!(dict.substitute("--plain"), Ok("--plain".to_string()));
        assert_eq!(dict.substitute("{MISSING}"), Err("MISSING"));
    }

    #[test]
    fn dictionary_builtins() {

        let raw = br#"{
            "spec": 1,
            "profile": "forge",
            "version": "forge-47.2.0",
            "json": "/version.json",
            "minecraft": "1.20.1",
            "data": { "MC_SLIM_SHA": { "client": "'abc'", "server": "'def'" } },
            "processors": []
        }"#;

        let dir = Path::new("/mc");
        let profile = InstallProfile::parse(raw, "test").unwrap();
        let dict = ValueDictionary::from_profile(&profile, &env(dir)).unwrap();
        assert_eq!(dict.get("MC_SLIM_SHA"), Some("abc"));
        assert_eq!(dict.get("SIDE"), Some("client"));
        assert_eq!(dict.get("MINECRAFT_VERSION"), Some("1.20.1"));
        assert!(dict.get("LIBRARY_DIR").is_some());

    }

    #[test]
    fn client_steps() {

        let raw = br#"{
            "version": "forge-47.2.0",
            "json": "/version.json",
            "minecraft": "1.20.1",
            "processors": [
                { "jar": "a:server:1", "sides": ["server"] },
                { "jar": "a:client:1", "sides": ["client"], "outputs": { "{B}": "{B_SHA}", "{A}": "{A_SHA}" } },
                { "jar": "a:both:1" }
            ]
        }"#;

        let profile = InstallProfile::parse(raw, "test").unwrap();
        let jars = profile.client_steps().map(|step| step.jar.to_string()).collect::<Vec<_>>();
        assert_eq!(jars, ["a:client:1", "a:both:1"]);
        assert_eq!(profile.steps[1].outputs[0].0, "{A}");

    }

    #[test]
    fn main_class() {

        assert_eq!(parse_main_class("Manifest-Version: 1.0\r\nMain-Class: net.minecraftforge.install\r\n er.SimpleInstaller\r\n"),
            Some("net.minecraftforge.installer.SimpleInstaller".to_string()));
        assert_eq!(parse_main_class("Manifest-Version: 1.0\n"), None);

        let dir = tempfile::tempdir().unwrap();
        let gav = "a:b:1".parse::<Gav>().unwrap();

        let jar_file = dir.path().join("good.jar");
        write_zip(&jar_file, &[("META-INF/MANIFEST.MF", "Main-Class: com.example.Main\n")]);
        assert_eq!(read_main_class(&jar_file, &gav).unwrap(), "com.example.Main");

        let jar_file = dir.path().join("no-manifest.jar");
        write_zip(&jar_file, &[("com/example/Main.class", "")]);
        assert!(matches!(read_main_class(&jar_file, &gav), Err(Error::InvalidJarManifest { .. })));

        let jar_file = dir.path().join("no-main.jar");
        write_zip(&jar_file, &[("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n")]);
        assert!(matches!(read_main_class(&jar_file, &gav), Err(Error::MainClassNotFound { .. })));

    }

    #[test]
    fn unpack() {

        let dir = tempfile::tempdir().unwrap();
        let installer_file = dir.path().join("installer.jar");
        write_zip(&installer_file, &[
            ("install_profile.json", r#"{ "version": "forge-47.2.0", "json": "/version.json", "minecraft": "1.20.1" }"#),
            ("version.json", r#"{ "id": "forge-47.2.0", "inheritsFrom": "1.20.1" }"#),
            ("maven/net/minecraftforge/forge/47.2.0/forge-47.2.0.jar", "forge"),
            ("data/client.lzma", "lzma"),
        ]);

        let work_dir = dir.path().join("work");
        let libraries_dir = dir.path().join("libraries");
        let versions_dir = dir.path().join("versions");

        // Left by a previous installer.
        fs::create_dir_all(work_dir.join("data")).unwrap();
        fs::write(work_dir.join("data/server.lzma"), "stale").unwrap();

        let profile = unpack_installer(&installer_file, &work_dir, &libraries_dir, &versions_dir).unwrap();

        assert_eq!(profile.version, "forge-47.2.0");
        assert!(work_dir.join("data/client.lzma").is_file());
        assert!(!work_dir.join("data/server.lzma").exists());
        assert_eq!(fs::read(libraries_dir.join("net/minecraftforge/forge/47.2.0/forge-47.2.0.jar")).unwrap(), b"forge");
        assert!(versions_dir.join("forge-47.2.0/forge-47.2.0.json").is_file());

    }

    #[cfg(unix)]
    fn fake_java(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let file = dir.join("java");
        fs::write(&file, script).unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        file
    }

    #[cfg(unix)]
    fn processor_env(dir: &Path, script: &str) -> ProcessorEnv {
        let mut env = env(dir);
        env.java_file = fake_java(dir, script);
        fs::create_dir_all(&env.installer_dir).unwrap();
        write_zip(&env.libraries_dir.join("a/proc/1/proc-1.jar"), &[("META-INF/MANIFEST.MF", "Main-Class: com.example.Proc\n")]);
        env
    }

    #[cfg(unix)]
    fn step(args: &[&str], outputs: &[(&str, &str)]) -> ProcessorStep {
        ProcessorStep {
            jar: "a:proc:1".parse().unwrap(),
            classpath: vec!["a:dep:1".parse().unwrap()],
            args: args.iter().map(|s| s.to_string()).collect(),
            sides: None,
            outputs: outputs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_and_verify_outputs() {

        let dir = tempfile::tempdir().unwrap();
        // Arguments are: -cp <classpath> <main class> <output file>
        let env = processor_env(dir.path(), "#!/bin/sh\nprintf 'Hello world!' > \"$4\"\n");
        let runner = ExternalProcessorRunner::new(env);

        let output_file = dir.path().join("out.txt");
        let mut dict = ValueDictionary::new();
        dict.insert("OUT", output_file.display().to_string());
        dict.insert("OUT_SHA", "'d3486ae9136e7856bc42212385ea797094475802'");

        let step = step(&["{OUT}"], &[("{OUT}", "{OUT_SHA}")]);
        let cancel = CancelToken::new();
        assert_eq!(runner.run_step(0, &step, &dict, &cancel).await.unwrap(), StepOutcome::Ran);
        assert_eq!(fs::read(&output_file).unwrap(), b"Hello world!");

        // Outputs are now valid.
        assert_eq!(runner.run_step(0, &step, &dict, &cancel).await.unwrap(), StepOutcome::Skipped);

    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit() {

        let dir = tempfile::tempdir().unwrap();
        let env = processor_env(dir.path(), "#!/bin/sh\necho \"bad things\" >&2\nexit 3\n");
        let runner = ExternalProcessorRunner::new(env);

        let steps = [step(&["--flag"], &[]), step(&["{NEVER}"], &[])];
        let err = runner.run(&steps, &ValueDictionary::new(), &CancelToken::new()).await.unwrap_err();
        match err {
            Error::ExitStatus { index, code, stderr, .. } => {
                assert_eq!(index, 0);
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bad things");
            }
            e => panic!("unexpected error: {e}"),
        }

    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_stderr() {

        let dir = tempfile::tempdir().unwrap();
        let env = processor_env(dir.path(), "#!/bin/sh\nprintf 'caf\\351\\n' >&2\necho \"bad things\" >&2\nexit 3\n");
        let runner = ExternalProcessorRunner::new(env);

        let err = runner.run_step(0, &step(&[], &[]), &ValueDictionary::new(), &CancelToken::new()).await.unwrap_err();
        match err {
            Error::ExitStatus { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "caf\u{FFFD}\nbad things");
            }
            e => panic!("unexpected error: {e}"),
        }

    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_key_and_cancel() {

        let dir = tempfile::tempdir().unwrap();
        let env = processor_env(dir.path(), "#!/bin/sh\nexec sleep 30\n");
        let runner = ExternalProcessorRunner::new(env);

        let err = runner.run_step(0, &step(&["{NEVER}"], &[]), &ValueDictionary::new(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownKey { key, .. } if key == "NEVER"));

        let cancel = CancelToken::new();
        let cancel_later = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel_later.cancel();
        });

        let start = std::time::Instant::now();
        let err = runner.run_step(0, &step(&[], &[]), &ValueDictionary::new(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));

    }

}
