use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use syncout_system::{ExecutionRequest, ExecutionResponse};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs source text and captures what it printed. Implementations never fail:
/// every problem ends up in the returned response.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse;
}

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub extension: &'static str,
    /// `{file}` is replaced by the source path, `{output}` by the build artifact.
    pub run: Vec<String>,
    pub compile: Option<Vec<String>>,
    pub timeout: Duration,
}

impl LanguageSpec {
    fn interpreted(extension: &'static str, run: &[&str], timeout_secs: u64) -> Self {
        Self {
            extension,
            run: run.iter().map(|s| s.to_string()).collect(),
            compile: None,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn compiled(extension: &'static str, compile: &[&str], run: &[&str], timeout_secs: u64) -> Self {
        Self {
            compile: Some(compile.iter().map(|s| s.to_string()).collect()),
            ..Self::interpreted(extension, run, timeout_secs)
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("Compiler/interpreter not found: {0}")]
    NotFound(String),
    #[error("Execution timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("Execution error: {0}")]
    Io(#[from] io::Error),
    #[error("Compilation error: {0}")]
    Compile(String),
}

impl RunError {
    /// Failures of the build step are reported as compilation errors.
    fn while_compiling(self) -> Self {
        match self {
            RunError::NotFound(program) => {
                RunError::Compile(format!("compiler not found: {}", program))
            }
            RunError::TimedOut(limit) => {
                RunError::Compile(format!("timed out after {}s", limit.as_secs_f64()))
            }
            RunError::Io(err) => RunError::Compile(err.to_string()),
            compile @ RunError::Compile(_) => compile,
        }
    }
}

struct Captured {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Executes programs as child processes of this server, in a scratch directory.
pub struct ProcessExecutor {
    languages: HashMap<String, LanguageSpec>,
    compile_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(languages: HashMap<String, LanguageSpec>) -> Self {
        Self {
            languages,
            compile_timeout: Duration::from_secs(30),
        }
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    async fn run(
        &self,
        spec: &LanguageSpec,
        request: &ExecutionRequest,
        started: Instant,
    ) -> Result<ExecutionResponse, RunError> {
        let workdir = tempfile::tempdir()?;
        let source = workdir.path().join(format!("main{}", spec.extension));
        let output = workdir.path().join("main");
        tokio::fs::write(&source, &request.code).await?;

        if let Some(compile) = &spec.compile {
            let compiled = run_process(
                &expand(compile, &source, &output),
                workdir.path(),
                "",
                self.compile_timeout,
            )
            .await
            .map_err(RunError::while_compiling)?;
            if compiled.exit_code != 0 {
                return Ok(ExecutionResponse {
                    succeeded: false,
                    stdout: compiled.stdout,
                    stderr: format!("Compilation failed:\n{}", compiled.stderr),
                    exit_code: compiled.exit_code,
                    elapsed_seconds: 0.0,
                });
            }
        }

        let captured = run_process(
            &expand(&spec.run, &source, &output),
            workdir.path(),
            &request.stdin,
            spec.timeout,
        )
        .await?;

        Ok(ExecutionResponse {
            succeeded: captured.exit_code == 0,
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.exit_code,
            elapsed_seconds: round_millis(started.elapsed()),
        })
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        let languages = vec![
            ("python", LanguageSpec::interpreted(".py", &["python", "{file}"], 10)),
            ("javascript", LanguageSpec::interpreted(".js", &["node", "{file}"], 10)),
            ("typescript", LanguageSpec::interpreted(".ts", &["ts-node", "{file}"], 10)),
            ("java", LanguageSpec::compiled(".java", &["javac", "{file}"], &["java", "{file}"], 15)),
            ("cpp", LanguageSpec::compiled(".cpp", &["g++", "{file}", "-o", "{output}"], &["{output}"], 15)),
            ("c", LanguageSpec::compiled(".c", &["gcc", "{file}", "-o", "{output}"], &["{output}"], 15)),
            ("go", LanguageSpec::interpreted(".go", &["go", "run", "{file}"], 10)),
            ("rust", LanguageSpec::compiled(".rs", &["rustc", "{file}", "-o", "{output}"], &["{output}"], 15)),
        ];
        Self::new(
            languages
                .into_iter()
                .map(|(name, spec)| (name.to_owned(), spec))
                .collect(),
        )
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse {
        let started = Instant::now();
        let spec = match self.languages.get(&request.language) {
            Some(spec) => spec,
            None => {
                return ExecutionResponse::failure(
                    format!("Language \"{}\" not supported", request.language),
                    0.0,
                )
            }
        };

        match self.run(spec, &request, started).await {
            Ok(response) => response,
            Err(err) => {
                let elapsed = match &err {
                    RunError::NotFound(_) => 0.0,
                    RunError::TimedOut(limit) => limit.as_secs_f64(),
                    RunError::Io(_) | RunError::Compile(_) => round_millis(started.elapsed()),
                };
                if let RunError::Io(_) = &err {
                    log::error!("Execution error: {}", err);
                }
                ExecutionResponse::failure(err.to_string(), elapsed)
            }
        }
    }
}

fn expand(template: &[String], source: &Path, output: &Path) -> Vec<String> {
    let source = source.to_string_lossy();
    let output = output.to_string_lossy();
    template
        .iter()
        .map(|part| part.replace("{file}", &source).replace("{output}", &output))
        .collect()
}

async fn run_process(
    argv: &[String],
    workdir: &Path,
    stdin: &str,
    limit: Duration,
) -> Result<Captured, RunError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| RunError::NotFound("empty command".to_owned()))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RunError::NotFound(format!("{}: {}", program, err)),
            _ => RunError::Io(err),
        })?;

    if let Some(mut pipe) = child.stdin.take() {
        let input = stdin.as_bytes().to_vec();
        tokio::spawn(async move {
            // the program may exit without reading its input
            let _ = pipe.write_all(&input).await;
        });
    }

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(Captured {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        }
        Err(_) => Err(RunError::TimedOut(limit)),
    }
}

fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
