use std::path::{Path, PathBuf};
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::fs;

use craftpipe::artifact::Layout;
use craftpipe::install::{self, Account, Event, Handler, Installer};
use craftpipe::manifest::{Arch, ManifestResolver, Os, Platform};
use craftpipe::task::CancelToken;

use tempfile::TempDir;

use mockito::{Server, ServerGuard};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;


const LINUX: Platform = Platform::new(Os::Linux, Arch::X86_64);
const HELLO_SHA1: &str = "d3486ae9136e7856bc42212385ea797094475802";

fn tempdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("")
        .suffix(".install")
        .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
        .unwrap()
}

fn write_manifest(versions_dir: &Path, id: &str, raw: &str) {
    let dir = versions_dir.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{id}.json")), raw).unwrap();
}

#[test]
#[cfg(unix)]
fn classpath_order() {

    let dir = tempdir();
    let layout = Layout::new(dir.path());

    write_manifest(&layout.versions_dir, "X", r#"{
        "id": "X",
        "mainClass": "Main",
        "libraries": [
            { "name": "com.example:a:1", "downloads": { "artifact": { "path": "a.jar", "url": "https://example.com/a.jar" } } },
            { "name": "com.example:b:1", "downloads": { "artifact": { "path": "b/b.jar", "url": "https://example.com/b.jar" } } }
        ]
    }"#);

    let manifest = ManifestResolver::new(&layout.versions_dir, LINUX).load("X").unwrap();
    let files = install::classpath_files(&manifest, &layout);
    let classpath = install::join_classpath(&files).unwrap();

    let repo = layout.libraries_dir.display();
    let run_dir = layout.version_dir("X");
    assert_eq!(classpath, format!("{repo}/a.jar:{repo}/b/b.jar:{}/X.jar", run_dir.display()));

}

/// Handler recording a short description of each event.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    totals: Mutex<Vec<f64>>,
}

impl Handler for Recorder {
    fn on_event(&self, event: Event<'_>) {
        let desc = match event {
            Event::ManifestFetching { id } => format!("fetching {id}"),
            Event::ManifestLoaded { manifest } => format!("loaded {}", manifest.id),
            Event::AssetIndexLoaded { id, count } => format!("asset index {id} {count}"),
            Event::LibrariesSelected { libraries, natives } => format!("libraries {libraries} {natives}"),
            Event::NativesExtracted { count, .. } => format!("natives {count}"),
            Event::Installed { instance } => format!("installed {}", instance.version),
            Event::InstallerUnpacked { version, .. } => format!("unpacked {version}"),
            Event::ProcessorFinished { index, jar } => format!("processor {index} {jar}"),
            Event::Progress { total } => {
                self.totals.lock().unwrap().push(total);
                return;
            }
            _ => return,
        };
        self.events.lock().unwrap().push(desc);
    }
}

/// Serve a version list whose latest release is `1.0`, along with everything needed
/// to install it.
async fn serve_release(server: &mut ServerGuard) {

    let url = server.url();

    let manifest = format!(r#"{{
        "id": "1.0",
        "type": "release",
        "mainClass": "net.minecraft.client.main.Main",
        "assetIndex": {{ "id": "1", "url": "{url}/index.json" }},
        "downloads": {{ "client": {{ "url": "{url}/client.jar", "size": 7 }} }},
        "libraries": [
            {{ "name": "com.example:hello:1.0", "downloads": {{ "artifact": {{ "path": "com/example/hello.jar", "url": "{url}/hello.jar", "sha1": "{HELLO_SHA1}", "size": 12 }} }} }}
        ],
        "arguments": {{
            "game": ["--username", "${{auth_player_name}}", "--version", "${{version_name}}", "--assetIndex", "${{assets_index_name}}"],
            "jvm": ["-cp", "${{classpath}}"]
        }}
    }}"#);

    let version_list = format!(r#"{{
        "latest": {{ "release": "1.0", "snapshot": "1.0" }},
        "versions": [
            {{ "id": "1.0", "type": "release", "url": "{url}/1.0.json", "releaseTime": "2020-01-01T00:00:00+00:00" }}
        ]
    }}"#);

    let index = format!(r#"{{ "objects": {{ "hello.txt": {{ "hash": "{HELLO_SHA1}", "size": 12 }} }} }}"#);

    server.mock("GET", "/version_manifest_v2.json").with_body(version_list).create_async().await;
    server.mock("GET", "/1.0.json").with_body(manifest).create_async().await;
    server.mock("GET", "/index.json").with_body(index).create_async().await;
    server.mock("GET", "/client.jar").with_body("client!").create_async().await;
    server.mock("GET", "/hello.jar").with_body("Hello world!").create_async().await;
    server.mock("GET", format!("/res/d3/{HELLO_SHA1}").as_str()).with_body("Hello world!").create_async().await;

}

fn installer(server: &ServerGuard, main_dir: &Path) -> Installer {
    let mut installer = Installer::new("release");
    installer
        .set_main_dir(main_dir)
        .set_platform(LINUX)
        .set_concurrency(4)
        .set_account(Account::offline("Steve"))
        .set_version_list_url(format!("{}/version_manifest_v2.json", server.url()))
        .set_resources_url(format!("{}/res/", server.url()));
    installer
}

#[tokio::test(flavor = "multi_thread")]
async fn install_release() {

    let mut server = Server::new_async().await;
    serve_release(&mut server).await;

    let dir = tempdir();
    let installer = installer(&server, dir.path());
    let recorder = std::sync::Arc::new(Recorder::default());

    let instance = installer.install(std::sync::Arc::clone(&recorder)).await.unwrap();

    assert_eq!(instance.version, "1.0");
    assert_eq!(instance.main_class, "net.minecraft.client.main.Main");
    assert_eq!(&instance.game_args[..6], ["--username", "Steve", "--version", "1.0", "--assetIndex", "1"]);
    assert_eq!(instance.jvm_args[0], "-cp");
    assert_eq!(instance.jvm_args[1], instance.classpath);
    assert!(instance.classpath.ends_with("1.0.jar"));
    assert!(instance.classpath.contains("hello.jar"));

    let main_dir = dir.path();
    assert!(main_dir.join("versions/1.0/1.0.json").is_file());
    assert_eq!(fs::read_to_string(main_dir.join("versions/1.0/1.0.jar")).unwrap(), "client!");
    assert_eq!(fs::read_to_string(main_dir.join("libraries/com/example/hello.jar")).unwrap(), "Hello world!");
    assert!(main_dir.join("assets/indexes/1.json").is_file());
    assert!(main_dir.join(format!("assets/objects/d3/{HELLO_SHA1}")).is_file());
    assert!(main_dir.join("versions/1.0/natives").is_dir());

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events, [
        "fetching 1.0",
        "loaded 1.0",
        "asset index 1 1",
        "libraries 1 0",
        "natives 0",
        "installed 1.0",
    ]);

    let totals = recorder.totals.lock().unwrap();
    assert_eq!(totals.last().copied(), Some(1.0));
    assert!(totals.windows(2).all(|w| w[0] <= w[1]));

}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn install_modloader() {

    use std::os::unix::fs::PermissionsExt;

    let mut server = Server::new_async().await;
    serve_release(&mut server).await;

    let dir = tempdir();
    let main_dir = dir.path().join("main");

    let proc_jar = zip_bytes(&[("META-INF/MANIFEST.MF", b"Main-Class: com.example.Proc\n")]);
    let installer_file = dir.path().join("loader-installer.jar");
    fs::write(&installer_file, zip_bytes(&[
        ("install_profile.json", br#"{
            "version": "loader-1.0",
            "json": "/version.json",
            "minecraft": "1.0",
            "data": {
                "CLIENT_SHA": { "client": "'d2a04d71301a8915217dd5faf81d12cffd6cd958'", "server": "'0000000000000000000000000000000000000000'" }
            },
            "processors": [
                {
                    "jar": "com.example:proc:1",
                    "sides": ["client"],
                    "args": ["{MINECRAFT_JAR}", "{ROOT}/client.txt", "{SIDE}"],
                    "outputs": { "{ROOT}/client.txt": "{CLIENT_SHA}" }
                },
                {
                    "jar": "com.example:proc:1",
                    "sides": ["server"],
                    "args": ["{MINECRAFT_JAR}", "{ROOT}/server.txt", "server"]
                }
            ]
        }"#),
        ("version.json", br#"{ "id": "loader-1.0", "inheritsFrom": "1.0", "mainClass": "com.example.loader.Main" }"#),
        ("maven/com/example/proc/1/proc-1.jar", &proc_jar),
    ])).unwrap();

    // Arguments are: -cp <classpath> <main class> <game jar> <output file> <side>
    let java_file = dir.path().join("java");
    fs::write(&java_file, "#!/bin/sh\ntest -f \"$4\" || exit 7\nprintf '%s' \"$6\" > \"$5\"\n").unwrap();
    fs::set_permissions(&java_file, fs::Permissions::from_mode(0o755)).unwrap();

    let mut installer = installer(&server, &main_dir);
    installer
        .set_modloader(&installer_file)
        .set_jvm_file(&java_file);

    let recorder = std::sync::Arc::new(Recorder::default());
    let instance = installer.install(std::sync::Arc::clone(&recorder)).await.unwrap();

    assert_eq!(instance.version, "loader-1.0");
    assert_eq!(instance.main_class, "com.example.loader.Main");
    assert_eq!(fs::read_to_string(main_dir.join("versions/loader-1.0/loader-1.0.jar")).unwrap(), "client!");
    assert!(main_dir.join("libraries/com/example/proc/1/proc-1.jar").is_file());

    assert_eq!(fs::read_to_string(main_dir.join("client.txt")).unwrap(), "client");
    assert!(!main_dir.join("server.txt").exists());

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("unpacked loader-1.0"));
    assert!(events.iter().any(|e| e == "fetching 1.0"));
    assert!(events.iter().any(|e| e == "processor 0 com.example:proc:1"));
    assert!(!events.iter().any(|e| e.starts_with("processor 1")));
    assert_eq!(events.last().map(String::as_str), Some("installed loader-1.0"));

}

#[tokio::test(flavor = "multi_thread")]
async fn install_twice_is_offline() {

    let mut server = Server::new_async().await;
    serve_release(&mut server).await;

    let dir = tempdir();
    let mut installer = installer(&server, dir.path());
    installer.install(()).await.unwrap();

    // Point everything to a closed server, the second run must not need it.
    installer
        .set_version("1.0")
        .set_version_list_url("http://127.0.0.1:1/version_manifest_v2.json")
        .set_resources_url("http://127.0.0.1:1/");
    drop(server);

    let instance = installer.install(()).await.unwrap();
    assert_eq!(instance.version, "1.0");

}

#[tokio::test(flavor = "multi_thread")]
async fn install_unknown_version() {

    let mut server = Server::new_async().await;
    serve_release(&mut server).await;

    let dir = tempdir();
    let mut installer = installer(&server, dir.path());
    installer.set_version("0.0");

    let err = installer.install(()).await.unwrap_err();
    assert!(matches!(err, install::Error::VersionNotFound { ref id } if id == "0.0"), "{err:?}");

}

#[tokio::test(flavor = "multi_thread")]
async fn install_cancelled() {

    let dir = tempdir();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut installer = Installer::new("1.0");
    installer
        .set_main_dir(dir.path())
        .set_platform(LINUX)
        .set_cancel_token(cancel);

    let err = installer.install(()).await.unwrap_err();
    assert!(matches!(err, install::Error::Cancelled), "{err:?}");

}

#[test]
fn instance_command() {

    let dir: PathBuf = tempdir().path().to_path_buf();
    let instance = install::Instance {
        version: "1.0".to_string(),
        main_class: "Main".to_string(),
        classpath: String::new(),
        jvm_args: vec!["-Xmx1G".to_string()],
        game_args: vec!["--demo".to_string()],
        natives_dir: dir.join("natives"),
        game_dir: dir.clone(),
        jvm_file: PathBuf::from("java"),
    };

    let command = instance.command();
    assert_eq!(command.get_program(), "java");
    assert_eq!(command.get_args().collect::<Vec<_>>(), ["-Xmx1G", "Main", "--demo"]);
    assert_eq!(command.get_current_dir(), Some(dir.as_path()));

}
