use myst_node_launcher::utils::settings::UiMode;
use myst_node_launcher::LaunchOptions;
use std::path::PathBuf;

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{}=", flag);
    args.iter().enumerate().find_map(|(i, a)| {
        if a == flag {
            args.get(i + 1).cloned()
        } else {
            a.strip_prefix(&prefix).map(str::to_string)
        }
    })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Non-interactive TUI smoke test mode (for automated checks).
    // Renders a single frame for a modal state and exits 0.
    // Usage: --tui-smoke or --tui-smoke=initial|install_needed|install_in_progress|install_finished|install_error
    if let Some(arg) = args
        .iter()
        .find(|a| a.as_str() == "--tui-smoke" || a.starts_with("--tui-smoke="))
    {
        let target = arg
            .split_once('=')
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.trim().is_empty());
        std::process::exit(myst_node_launcher::run_tui_smoke(target));
    }

    // Surface selection:
    // - --tui / --console on the command line win
    // - otherwise `ui` from settings (MYST_LAUNCHER_UI=auto|tui|console)
    // - auto picks the TUI when stdout is a terminal
    let ui = if args.iter().any(|a| a == "--tui") {
        Some(UiMode::Tui)
    } else if args.iter().any(|a| a == "--console") {
        Some(UiMode::Console)
    } else {
        None
    };

    let opts = LaunchOptions {
        settings_path: flag_value(&args, "--settings").map(PathBuf::from),
        ui,
        // Second run after the reboot WSL needed: don't ask again.
        install_stage2: args.iter().any(|a| a == "--install-stage2"),
    };

    if args.iter().any(|a| a == "--print-settings") {
        std::process::exit(myst_node_launcher::print_settings(&opts));
    }

    std::process::exit(myst_node_launcher::run(opts));
}
