//! Interactive numbered menu.
//!
//! Generic over the reader and writers so tests can drive it from a byte
//! slice. Handler errors are printed and the loop continues; only
//! cancellation and I/O on the terminal itself end it with an error.

use std::{future::Future, pin::Pin};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::app::{App, ShareLink};
use crate::bbr::TuningReport;
use crate::error::AppError;
use crate::node::share::PLACEHOLDER_HOST;

pub const CONFIRM_UNINSTALL: &str = "confirm uninstall";
pub const CONFIRM_BBR: &str = "confirm bbr";

pub type ActionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// What the menu can ask for. [`App`] is the real implementation.
pub trait Actions: Send + Sync {
    fn has_config(&self) -> bool;
    fn is_installed(&self) -> bool;
    fn add(&self) -> ActionFuture<'_, ShareLink>;
    fn show(&self) -> ActionFuture<'_, ShareLink>;
    fn uninstall(&self) -> ActionFuture<'_, ()>;
    fn enable_bbr(&self) -> ActionFuture<'_, TuningReport>;
}

impl Actions for App {
    fn has_config(&self) -> bool {
        App::has_config(self)
    }

    fn is_installed(&self) -> bool {
        App::is_installed(self)
    }

    fn add(&self) -> ActionFuture<'_, ShareLink> {
        Box::pin(App::add(self))
    }

    fn show(&self) -> ActionFuture<'_, ShareLink> {
        Box::pin(App::show(self))
    }

    fn uninstall(&self) -> ActionFuture<'_, ()> {
        Box::pin(App::uninstall(self))
    }

    fn enable_bbr(&self) -> ActionFuture<'_, TuningReport> {
        Box::pin(App::enable_bbr(self))
    }
}

/// Terminal streams for one session.
pub struct Console<R, W, E> {
    input: R,
    out: W,
    err: E,
}

impl<R, W, E> Console<R, W, E>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    pub fn new(input: R, out: W, err: E) -> Self {
        Self { input, out, err }
    }

    pub fn into_parts(self) -> (R, W, E) {
        (self.input, self.out, self.err)
    }

    async fn say(&mut self, text: &str) -> Result<(), AppError> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn complain(&mut self, e: &AppError) -> Result<(), AppError> {
        self.err.write_all(format!("error: {e}\n").as_bytes()).await?;
        self.err.flush().await?;
        Ok(())
    }

    /// One trimmed line, or `None` at end of input.
    async fn read_line(&mut self, cancel: &CancellationToken) -> Result<Option<String>, AppError> {
        let mut line = String::new();
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            n = self.input.read_line(&mut line) => n?,
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn confirm(
        &mut self,
        cancel: &CancellationToken,
        warning: &str,
        phrase: &str,
    ) -> Result<bool, AppError> {
        self.say(&format!("\n{warning}\nType \"{phrase}\" to continue: ")).await?;
        match self.read_line(cancel).await? {
            Some(answer) if answer == phrase => Ok(true),
            _ => {
                self.say("Cancelled.\n").await?;
                Ok(false)
            }
        }
    }

    async fn print_link(&mut self, link: &ShareLink) -> Result<(), AppError> {
        self.say(&format!("{}\n", link.uri)).await?;
        if !link.host_resolved {
            self.say(&format!(
                "note: public IP lookup failed; replace \"{PLACEHOLDER_HOST}\" with this server's address\n"
            ))
            .await?;
        }
        Ok(())
    }

    async fn print_tuning(&mut self, report: &TuningReport) -> Result<(), AppError> {
        let state = if report.already_enabled { "already enabled" } else { "enabled" };
        self.say(&format!(
            "BBR {state}: tcp_congestion_control={} default_qdisc={}\n",
            report.congestion_control, report.default_qdisc
        ))
        .await?;
        for step in report.best_effort.iter().filter(|a| a.ignored()) {
            self.say(&format!("note: `{}` failed (ignored)\n", step.step)).await?;
        }
        Ok(())
    }
}

const MENU: &str = "\
===== sing-box (VLESS Reality) =====
1) Add config (regenerate / overwrite)
2) Show config (print import URI)
3) Remove config (uninstall everything)
4) Enable BBR (fq + bbr)
0) Exit
Choice: ";

const UNINSTALL_WARNING: &str = "\
Uninstall stops the service, removes it from OpenRC and deletes every file this tool wrote.
The proxy will be unavailable until you install again.";

const BBR_WARNING: &str = "\
Enabling BBR changes global sysctl settings, may load kernel modules and persists both for boot.
Some kernels or existing tuning may not cooperate.";

/// First-run behaviour: install when nothing is deployed, hint when the
/// config exists but the service is not ours.
pub async fn startup<R, W, E>(
    actions: &dyn Actions,
    console: &mut Console<R, W, E>,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    if !actions.has_config() {
        console.say("No deployed instance found; installing and generating a config...\n").await?;
        let link = actions.add().await?;
        console.say("Deployed (single node, overwrite mode).\n").await?;
        console.print_link(&link).await?;
    } else if !actions.is_installed() {
        console
            .say("A config exists but the OpenRC service is missing or not managed by this tool; use \"Add config\" or \"Remove config\" from the menu.\n")
            .await?;
    }
    Ok(())
}

/// Run the menu until exit, EOF, successful uninstall or cancellation.
pub async fn run<R, W, E>(
    actions: &dyn Actions,
    console: &mut Console<R, W, E>,
    cancel: &CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    loop {
        console.say(MENU).await?;
        let Some(choice) = console.read_line(cancel).await? else {
            return Ok(());
        };

        let outcome = match choice.as_str() {
            "1" => match actions.add().await {
                Ok(link) => {
                    console.say("Deployed (single node, overwrite mode).\n").await?;
                    console.print_link(&link).await
                }
                Err(e) => Err(e),
            },
            "2" => match actions.show().await {
                Ok(link) => console.print_link(&link).await,
                Err(e) => Err(e),
            },
            "3" => {
                if !console.confirm(cancel, UNINSTALL_WARNING, CONFIRM_UNINSTALL).await? {
                    continue;
                }
                match actions.uninstall().await {
                    Ok(()) => {
                        console.say("Uninstalled; service and all files removed.\n").await?;
                        return Ok(());
                    }
                    Err(e) => Err(e),
                }
            }
            "4" => {
                if !console.confirm(cancel, BBR_WARNING, CONFIRM_BBR).await? {
                    continue;
                }
                match actions.enable_bbr().await {
                    Ok(report) => console.print_tuning(&report).await,
                    Err(e) => Err(e),
                }
            }
            "0" => return Ok(()),
            _ => console.say("Invalid choice\n").await,
        };

        match outcome {
            Ok(()) => {}
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => console.complain(&e).await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{Attempt, BestEffort};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        has_config: bool,
        installed: bool,
        fail_add: bool,
        fail_uninstall: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Script {
        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn link() -> ShareLink {
        ShareLink { uri: "vless://id@203.0.113.7:40001".into(), host_resolved: true }
    }

    impl Actions for Script {
        fn has_config(&self) -> bool {
            self.has_config
        }

        fn is_installed(&self) -> bool {
            self.installed
        }

        fn add(&self) -> ActionFuture<'_, ShareLink> {
            self.record("add");
            let fail = self.fail_add;
            Box::pin(async move {
                if fail {
                    Err(AppError::Network("GitHub API returned 502".into()))
                } else {
                    Ok(link())
                }
            })
        }

        fn show(&self) -> ActionFuture<'_, ShareLink> {
            self.record("show");
            Box::pin(async {
                Ok(ShareLink { uri: "vless://id@your_ip:40001".into(), host_resolved: false })
            })
        }

        fn uninstall(&self) -> ActionFuture<'_, ()> {
            self.record("uninstall");
            let fail = self.fail_uninstall;
            Box::pin(async move {
                if fail {
                    Err(AppError::OwnershipConflict { path: "/etc/init.d/alpine-vless".into() })
                } else {
                    Ok(())
                }
            })
        }

        fn enable_bbr(&self) -> ActionFuture<'_, TuningReport> {
            self.record("bbr");
            Box::pin(async {
                Ok(TuningReport {
                    already_enabled: false,
                    congestion_control: "bbr".into(),
                    default_qdisc: "fq".into(),
                    available_algorithms: "reno cubic bbr".into(),
                    best_effort: vec![Attempt {
                        step: "rc-service modules restart".into(),
                        outcome: BestEffort::Ignored("exit status: 1".into()),
                    }],
                })
            })
        }
    }

    async fn drive(script: &Script, input: &str) -> (Result<(), AppError>, String, String) {
        let cancel = CancellationToken::new();
        let mut console = Console::new(input.as_bytes(), Vec::new(), Vec::new());
        let res = run(script, &mut console, &cancel).await;
        let (_, out, err) = console.into_parts();
        (res, String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[tokio::test]
    async fn exit_choice_ends_loop() {
        let script = Script::default();
        let (res, out, _) = drive(&script, "0\n").await;
        res.unwrap();
        assert!(out.contains("1) Add config"));
        assert!(script.calls().is_empty());
    }

    #[tokio::test]
    async fn eof_ends_loop() {
        let script = Script::default();
        let (res, _, _) = drive(&script, "").await;
        res.unwrap();
    }

    #[tokio::test]
    async fn handler_error_is_printed_and_loop_continues() {
        let script = Script { fail_add: true, ..Default::default() };
        let (res, _, err) = drive(&script, "1\n2\n0\n").await;
        res.unwrap();
        assert!(err.contains("error: network error"), "{err}");
        assert_eq!(script.calls(), vec!["add", "show"]);
    }

    #[tokio::test]
    async fn show_prints_placeholder_note() {
        let script = Script::default();
        let (_, out, _) = drive(&script, "2\n").await;
        assert!(out.contains("vless://id@your_ip:40001\n"));
        assert!(out.contains("replace \"your_ip\""));
    }

    #[tokio::test]
    async fn uninstall_requires_exact_phrase() {
        let script = Script::default();
        let (res, out, _) = drive(&script, "3\nyes\n0\n").await;
        res.unwrap();
        assert!(out.contains("Cancelled."));
        assert!(script.calls().is_empty());
    }

    #[tokio::test]
    async fn successful_uninstall_exits() {
        let script = Script::default();
        let input = format!("3\n{CONFIRM_UNINSTALL}\n2\n");
        let (res, out, _) = drive(&script, &input).await;
        res.unwrap();
        assert!(out.contains("Uninstalled"));
        assert_eq!(script.calls(), vec!["uninstall"]);
    }

    #[tokio::test]
    async fn failed_uninstall_keeps_menu_open() {
        let script = Script { fail_uninstall: true, ..Default::default() };
        let input = format!("3\n{CONFIRM_UNINSTALL}\n0\n");
        let (res, _, err) = drive(&script, &input).await;
        res.unwrap();
        assert!(err.contains("not managed by alpine-vless"), "{err}");
        assert_eq!(script.calls(), vec!["uninstall"]);
    }

    #[tokio::test]
    async fn bbr_report_lists_ignored_steps() {
        let script = Script::default();
        let input = format!("4\n  {CONFIRM_BBR}  \n0\n");
        let (_, out, _) = drive(&script, &input).await;
        assert!(out.contains("BBR enabled: tcp_congestion_control=bbr default_qdisc=fq"));
        assert!(out.contains("`rc-service modules restart` failed (ignored)"));
    }

    #[tokio::test]
    async fn unknown_choice_is_reported() {
        let script = Script::default();
        let (_, out, _) = drive(&script, "9\n0\n").await;
        assert!(out.contains("Invalid choice"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_reading() {
        let script = Script::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut console = Console::new("1\n".as_bytes(), Vec::new(), Vec::new());
        let err = run(&script, &mut console, &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert!(script.calls().is_empty());
    }

    #[tokio::test]
    async fn startup_installs_when_nothing_deployed() {
        let script = Script::default();
        let mut console = Console::new(&b""[..], Vec::new(), Vec::new());
        startup(&script, &mut console).await.unwrap();
        let (_, out, _) = console.into_parts();
        assert_eq!(script.calls(), vec!["add"]);
        assert!(String::from_utf8(out).unwrap().contains("vless://id@203.0.113.7:40001"));
    }

    #[tokio::test]
    async fn startup_hints_when_service_is_not_ours() {
        let script = Script { has_config: true, installed: false, ..Default::default() };
        let mut console = Console::new(&b""[..], Vec::new(), Vec::new());
        startup(&script, &mut console).await.unwrap();
        let (_, out, _) = console.into_parts();
        assert!(script.calls().is_empty());
        assert!(String::from_utf8(out).unwrap().contains("not managed by this tool"));
    }

    #[tokio::test]
    async fn startup_is_quiet_when_installed() {
        let script = Script { has_config: true, installed: true, ..Default::default() };
        let mut console = Console::new(&b""[..], Vec::new(), Vec::new());
        startup(&script, &mut console).await.unwrap();
        let (_, out, _) = console.into_parts();
        assert!(out.is_empty());
    }
}
