//! `docsite` command line: offline content updates, notifications and server helpers.

use std::time::{Duration, Instant};

use docsite::app_dirs;
use docsite::config::{self, AppConfig};
use docsite::logging;
use docsite::notifications::{Filter, Inbox, NotificationsClient, Sort, Tab};
use docsite::offline::{
    CoordinatorOptions, HttpUpdateSource, JsonFileStore, OfflineCoordinator, PackageWorkerHost,
    SettingsPatch, WorkerSupport,
};
use docsite::server::{self, locale};

const INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const EVENT_POLL: Duration = Duration::from_millis(250);

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum OfflineCommand {
    Status,
    Settings(SettingsPatch),
    Check,
    Update,
    Clear,
    Ping,
    Watch,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Offline(OfflineCommand),
    Locale {
        cookie: Option<String>,
        accept_language: Option<String>,
    },
    Redirect {
        path: String,
    },
    Notifications {
        tab: Tab,
        page: u32,
        terms: String,
        filter: Option<Filter>,
        sort: Option<Sort>,
    },
}

fn try_main() -> Result<(), String> {
    let command = parse_args(std::env::args().skip(1).collect())?;
    let config = config::load_or_default().map_err(|err| err.to_string())?;
    if let Err(err) = logging::init(&config.log_level) {
        eprintln!("Logging disabled: {err}");
    }
    match command {
        Command::Locale {
            cookie,
            accept_language,
        } => {
            let picked = locale::get_locale(
                cookie.as_deref(),
                accept_language.as_deref(),
                &config.site.default_locale,
            );
            println!("{picked}");
            Ok(())
        }
        Command::Redirect { path } => {
            let map = server::build_redirects_map(&config.content.clone().with_env_overrides());
            match map.get(&path) {
                Some(target) => {
                    println!("{target}");
                    Ok(())
                }
                None => Err(format!("No redirect for {path}")),
            }
        }
        Command::Notifications {
            tab,
            page,
            terms,
            filter,
            sort,
        } => list_notifications(&config, tab, page, terms, filter, sort),
        Command::Offline(command) => run_offline(&config, command),
    }
}

fn open_coordinator(config: &AppConfig) -> Result<OfflineCoordinator, String> {
    let root = app_dirs::app_root_dir().map_err(|err| err.to_string())?;
    let offline_dir = app_dirs::offline_dir().map_err(|err| err.to_string())?;
    let base_url = &config.offline.updates_base_url;
    let mut coordinator = OfflineCoordinator::new(
        Box::new(JsonFileStore::in_dir(&root)),
        Box::new(HttpUpdateSource::new(base_url.clone())),
        WorkerSupport::available(PackageWorkerHost::new(base_url.clone(), offline_dir)),
        CoordinatorOptions {
            scope: config.offline.worker_scope.clone(),
            auto_update_interval: config.offline.auto_update_interval(),
        },
    );
    // Worker registrations do not outlive the process; restore it for this run.
    if coordinator.settings().offline {
        let version = coordinator.settings().current_version.clone();
        coordinator
            .enable_worker(None, version)
            .map_err(|err| err.to_string())?;
        coordinator.process_events();
    }
    Ok(coordinator)
}

fn run_offline(config: &AppConfig, command: OfflineCommand) -> Result<(), String> {
    let mut coordinator = open_coordinator(config)?;
    match command {
        OfflineCommand::Status => print_status(&coordinator),
        OfflineCommand::Settings(patch) => {
            if patch.is_empty() {
                return Err(format!("Nothing to change\n\n{}", help_text()));
            }
            let settings = coordinator
                .apply_settings(patch)
                .map_err(|err| err.to_string())?;
            wait_until_idle(&mut coordinator);
            println!(
                "offline={} preferOnline={} autoUpdates={}",
                settings.offline, settings.prefer_online, settings.auto_updates
            );
        }
        OfflineCommand::Check => {
            let status = coordinator
                .update_available()
                .map_err(|err| err.to_string())?;
            println!(
                "{} (installed {}, latest {})",
                status.state,
                status.current_version.as_deref().unwrap_or("none"),
                status.update_version.as_deref().unwrap_or("unknown")
            );
        }
        OfflineCommand::Update => {
            if !coordinator.settings().offline {
                return Err("Offline mode is off; run `docsite settings --offline on`".into());
            }
            coordinator
                .check_for_update()
                .map_err(|err| err.to_string())?;
            coordinator
                .request_update()
                .map_err(|err| err.to_string())?;
            wait_until_idle(&mut coordinator);
            print_status(&coordinator);
        }
        OfflineCommand::Clear => {
            coordinator.clear().map_err(|err| err.to_string())?;
            if !coordinator.is_updating() {
                println!("No offline content to clear");
            }
            wait_until_idle(&mut coordinator);
        }
        OfflineCommand::Ping => {
            coordinator.ping().map_err(|err| err.to_string())?;
            if coordinator.wait_for_events(Duration::from_secs(2)) == 0 {
                return Err("No answer from the offline worker".into());
            }
        }
        OfflineCommand::Watch => {
            coordinator.start();
            loop {
                coordinator.wait_for_events(Duration::from_secs(60));
            }
        }
    }
    Ok(())
}

/// Pump worker events until no install or clear is running.
fn wait_until_idle(coordinator: &mut OfflineCoordinator) {
    let started = Instant::now();
    let mut last = None;
    while (coordinator.is_updating() || coordinator.is_installing())
        && started.elapsed() < INSTALL_TIMEOUT
    {
        coordinator.wait_for_events(EVENT_POLL);
        let status = coordinator.status();
        let current = (status.state, status.progress);
        if last != Some(current) {
            if status.progress >= 0 {
                eprintln!("{} {}%", status.state, status.progress);
            } else {
                eprintln!("{}", status.state);
            }
            last = Some(current);
        }
    }
    coordinator.process_events();
}

fn print_status(coordinator: &OfflineCoordinator) {
    let settings = coordinator.settings();
    let status = coordinator.status();
    println!("offline:      {}", settings.offline);
    println!("preferOnline: {}", settings.prefer_online);
    println!("autoUpdates:  {}", settings.auto_updates);
    println!("state:        {}", status.state);
    println!(
        "installed:    {} ({})",
        status.current_version.as_deref().unwrap_or("none"),
        status.current_date.as_deref().unwrap_or("-")
    );
}

fn list_notifications(
    config: &AppConfig,
    tab: Tab,
    page: u32,
    terms: String,
    filter: Option<Filter>,
    sort: Option<Sort>,
) -> Result<(), String> {
    let mut client =
        NotificationsClient::new(&config.site.base_url).map_err(|err| err.to_string())?;
    let mut inbox = Inbox::new(tab);
    inbox.set_search(terms, filter, sort);
    inbox.load(&mut client).map_err(|err| err.to_string())?;
    while inbox.page() < page && inbox.has_more() {
        inbox.load_more(&mut client).map_err(|err| err.to_string())?;
    }
    println!("{}", tab.title());
    if tab == Tab::Watching {
        for item in inbox.watched() {
            println!("  {}  {}", item.title, item.url);
        }
        return Ok(());
    }
    for item in inbox.items() {
        let note = &item.notification;
        let star = if note.starred { "*" } else { " " };
        let unread = if note.read { " " } else { "•" };
        println!("{star}{unread} [{}] {}  {}", note.id, note.title, note.url);
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        return Err(help_text());
    }
    let name = args[0].as_str();
    let rest = &args[1..];
    let mut i = 0;
    match name {
        "status" | "check" | "update" | "clear" | "ping" | "watch" => {
            if let Some(extra) = rest.first() {
                return Err(format!("Unknown argument '{extra}'\n\n{}", help_text()));
            }
            Ok(Command::Offline(match name {
                "status" => OfflineCommand::Status,
                "check" => OfflineCommand::Check,
                "update" => OfflineCommand::Update,
                "clear" => OfflineCommand::Clear,
                "ping" => OfflineCommand::Ping,
                _ => OfflineCommand::Watch,
            }))
        }
        "settings" => {
            let mut patch = SettingsPatch::default();
            while i < rest.len() {
                match rest[i].as_str() {
                    "--offline" => patch.offline = Some(on_off(rest, &mut i, "--offline")?),
                    "--prefer-online" => {
                        patch.prefer_online = Some(on_off(rest, &mut i, "--prefer-online")?);
                    }
                    "--auto-updates" => {
                        patch.auto_updates = Some(on_off(rest, &mut i, "--auto-updates")?);
                    }
                    unknown => {
                        return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text()));
                    }
                }
                i += 1;
            }
            Ok(Command::Offline(OfflineCommand::Settings(patch)))
        }
        "locale" => {
            let mut cookie = None;
            let mut accept_language = None;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--cookie" => cookie = Some(next_value(rest, &mut i, "--cookie")?),
                    "--accept-language" => {
                        accept_language = Some(next_value(rest, &mut i, "--accept-language")?);
                    }
                    unknown => {
                        return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text()));
                    }
                }
                i += 1;
            }
            Ok(Command::Locale {
                cookie,
                accept_language,
            })
        }
        "redirect" => match rest {
            [path] => Ok(Command::Redirect { path: path.clone() }),
            _ => Err(format!("Usage: docsite redirect <path>\n\n{}", help_text())),
        },
        "notifications" => {
            let mut tab = Tab::All;
            let mut page = 1;
            let mut terms = String::new();
            let mut filter = None;
            let mut sort = None;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--starred" => tab = Tab::Starred,
                    "--watching" => tab = Tab::Watching,
                    "--page" => {
                        let value = next_value(rest, &mut i, "--page")?;
                        page = value
                            .parse::<u32>()
                            .ok()
                            .filter(|page| *page > 0)
                            .ok_or_else(|| format!("Invalid page '{value}'"))?;
                    }
                    "--q" => terms = next_value(rest, &mut i, "--q")?,
                    "--filter" => {
                        filter = Some(match next_value(rest, &mut i, "--filter")?.as_str() {
                            "content" => Filter::Content,
                            "compat" => Filter::Compat,
                            other => return Err(format!("Unknown filter '{other}'")),
                        });
                    }
                    "--sort" => {
                        sort = Some(match next_value(rest, &mut i, "--sort")?.as_str() {
                            "date" => Sort::Date,
                            "title" => Sort::Title,
                            other => return Err(format!("Unknown sort '{other}'")),
                        });
                    }
                    unknown => {
                        return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text()));
                    }
                }
                i += 1;
            }
            Ok(Command::Notifications {
                tab,
                page,
                terms,
                filter,
                sort,
            })
        }
        unknown => Err(format!("Unknown command '{unknown}'\n\n{}", help_text())),
    }
}

fn next_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    let next = args.get(*i + 1).ok_or_else(|| format!("Missing value for {name}"))?;
    *i += 1;
    Ok(next.clone())
}

fn on_off(args: &[String], i: &mut usize, name: &str) -> Result<bool, String> {
    match next_value(args, i, name)?.as_str() {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        other => Err(format!("Expected on|off for {name}, got '{other}'")),
    }
}

fn help_text() -> String {
    "Usage: docsite <command> [options]\n\n\
Commands:\n\
  status                          Show offline settings and installed content\n\
  settings [options]              Change offline settings\n\
      --offline <on|off>\n\
      --prefer-online <on|off>\n\
      --auto-updates <on|off>\n\
  check                           Check for a newer content release\n\
  update                          Download and install the latest content\n\
  clear                           Remove installed offline content\n\
  ping                            Check the offline worker responds\n\
  watch                           Keep running and apply hourly auto updates\n\
  locale [--cookie <L>] [--accept-language <H>]\n\
                                  Negotiate the locale for a request\n\
  redirect <path>                 Look up a redirect from the content roots\n\
  notifications [options]         List notifications\n\
      --starred | --watching\n\
      --page <N>  --q <terms>\n\
      --filter <content|compat>  --sort <date|title>\n\
  -h, --help                      Show help\n"
        .to_string()
}
