mod auth;
mod consolidator;
mod export;
mod fetcher;
mod hierarchy;
mod labels;
mod models;
mod normalizer;
mod session;
mod views;

use anyhow::{Context, Result};
use auth::{CredentialStore, Principal};
use clap::{Arg, Command};
use consolidator::{ConsolidatedTable, ConsolidationError, Consolidator};
use export::{write_csv_file, ExportTable};
use fetcher::{Fetch, HttpFetcher};
use models::{Config, Table};
use session::ReportSession;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use views::{Report, Section, Selection};

const CONSOLIDATED_FILE: &str = "consolidado.csv";
const SUMMARY_FILE: &str = "resumo.txt";

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("spaece-report")
        .version("0.1")
        .about("Consolidates SPAECE results for an entity and its hierarchy")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("code")
                .long("code")
                .value_name("CODE")
                .help("Entity code to report on"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .env("SPAECE_PASSWORD")
                .hide_env_values(true)
                .help("Password of the entity, or the master password"),
        )
        .arg(Arg::new("stage").long("stage").value_name("STAGE").help("Stage filter"))
        .arg(
            Arg::new("discipline")
                .long("discipline")
                .value_name("DISCIPLINE")
                .help("Discipline filter"),
        )
        .arg(
            Arg::new("network")
                .long("network")
                .value_name("NETWORK")
                .help("School network filter"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory, overrides the configuration"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!(
            "⚠️  Please edit {} and set the API url and indicators, then run the program again.",
            config_file
        );
        return Ok(());
    };

    if config.indicators.is_empty() {
        println!("❌ Error: indicators is empty in configuration file");
        println!("   Please edit {} and list the indicators to request", config_file);
        return Ok(());
    }

    let (Some(code), Some(password)) = (
        matches.get_one::<String>("code"),
        matches.get_one::<String>("password"),
    ) else {
        println!("❌ Error: both --code and --password (or SPAECE_PASSWORD) are required");
        return Ok(());
    };

    let credentials = CredentialStore::load_from_file(&config.credentials_file)?;
    let principal = credentials
        .login(code, password)
        .with_context(|| format!("Login failed for entity {}", code.trim()))?;
    let display_name = credentials.display_name(principal.code());
    println!("🔐 Logged in: {} ({})", display_name, principal.code());
    if principal.is_master() {
        println!("   🔑 Master access");
    }

    let requested = Selection {
        stage: cli_or_config(&matches, "stage", &config.stage),
        discipline: cli_or_config(&matches, "discipline", &config.discipline),
        network: cli_or_config(&matches, "network", &config.network),
    };
    let output_dir = matches
        .get_one::<String>("output")
        .cloned()
        .or_else(|| config.output_directory.clone())
        .unwrap_or_else(|| "output".to_string());

    println!("🌐 Fetching data from: {}", config.api_url);
    let consolidator = Consolidator::new(HttpFetcher::from_config(&config));
    let mut session = ReportSession::new();
    let Some(consolidated) = load_report(&mut session, &consolidator, principal.code()).await? else {
        println!("⚠️  No data returned by the API for entity {}", principal.code());
        return Ok(());
    };

    let report = &consolidated.report;
    println!("   ✅ {} records consolidated", report.total_rows);
    for member in &report.merged {
        println!("   ➕ Merged hierarchy member: {}", member);
    }
    for member in &report.skipped {
        println!("   ⚠️  Skipped hierarchy member: {}", member);
    }

    let mut table = consolidated.table.clone();
    views::restrict_to_state(&mut table, principal.code());
    let applied = views::apply_filters(&mut table, &requested)?;
    info!(rows = table.len(), "filters applied");

    // Create output directory if it doesn't exist
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir))?;
    clean_output_directory(&output_dir)?;
    println!("📄 Output directory: {} (cleaned)", output_dir);

    let output_path = Path::new(&output_dir);
    write_csv_file(
        &output_path.join(CONSOLIDATED_FILE),
        &ExportTable::from_table(&consolidated.table),
    )?;
    println!("   ✅ {}", CONSOLIDATED_FILE);

    let sections = Report::build(&table);
    generate_view_csvs(&sections, output_path)?;

    let summary = render_summary(&principal, &display_name, consolidated, &table, &applied, &sections);
    fs::write(output_path.join(SUMMARY_FILE), &summary)
        .with_context(|| format!("Failed to write {}", SUMMARY_FILE))?;

    println!("\n{}", summary);
    println!("✅ Report complete!");
    println!("Check {} for the exported views.", output_dir);
    Ok(())
}

/// Consolidated table for `code`, or `None` when the API has nothing for it.
/// Only transport failures of the root fetch are errors.
async fn load_report<'a, F: Fetch>(
    session: &'a mut ReportSession,
    consolidator: &Consolidator<F>,
    code: &str,
) -> Result<Option<&'a ConsolidatedTable>> {
    match session.load(consolidator, code).await {
        Ok(consolidated) => Ok(Some(consolidated)),
        Err(ConsolidationError::NoRootData(_)) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to build the report for entity {}", code)),
    }
}

fn cli_or_config(matches: &clap::ArgMatches, name: &str, fallback: &Option<String>) -> Option<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .or_else(|| fallback.clone())
}

fn generate_view_csvs(report: &Report, output_dir: &Path) -> Result<()> {
    for (title, file_name, export) in report.exports() {
        match export {
            Some(export) => {
                write_csv_file(&output_dir.join(file_name), export)?;
                if export.is_empty() {
                    println!("   ⚠️  {}: {} (no rows)", title, file_name);
                } else {
                    println!("   ✅ {}: {} ({} rows)", title, file_name, export.len());
                }
            }
            None => println!("   ⚠️  {}: required columns not found or no rows", title),
        }
    }
    Ok(())
}

fn format_value(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}

fn render_summary(
    principal: &Principal,
    display_name: &str,
    consolidated: &ConsolidatedTable,
    filtered: &Table,
    applied: &Selection,
    sections: &Report,
) -> String {
    let mut content = String::new();
    content.push_str("Relatório SPAECE\n");
    content.push_str("================\n\n");
    content.push_str(&format!(
        "Gerado em: {}\n",
        chrono::Local::now().format("%d/%m/%Y às %H:%M")
    ));
    content.push_str(&format!("Entidade: {} - {}\n", principal.code(), display_name));
    if principal.is_master() {
        content.push_str("Acesso: mestre\n");
    }
    for (column, label) in [
        ("NM_ENTIDADE", "Nome"),
        ("NM_MUNICIPIO", "Município"),
        ("NM_REGIONAL", "Regional"),
        ("NM_ESTADO", "Estado"),
    ] {
        if let Some(value) = consolidated.table.first_text(column) {
            content.push_str(&format!("{}: {}\n", label, value));
        }
    }

    let report = &consolidated.report;
    content.push_str(&format!("\nRegistros consolidados: {}\n", report.total_rows));
    if !report.discovered.is_empty() {
        content.push_str(&format!("Hierarquia: {}\n", report.discovered.join(", ")));
        content.push_str(&format!("   Incorporados: {}\n", report.merged.join(", ")));
        if !report.skipped.is_empty() {
            content.push_str(&format!("   Ignorados: {}\n", report.skipped.join(", ")));
        }
    }

    let chosen = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    content.push_str(&format!(
        "Filtros: Etapa: {} | Componente: {} | Rede: {}\n",
        chosen(&applied.stage),
        chosen(&applied.discipline),
        chosen(&applied.network)
    ));
    content.push_str(&format!("Registros após filtros: {}\n", filtered.len()));

    content.push_str("\n📈 Taxa de participação\n");
    match &sections.participation {
        Section::Ready(view) => {
            for gauge in &view.gauges {
                content.push_str(&format!(
                    "   {}: {} - {:.1}% ({} de {} alunos)\n",
                    gauge.kind.label(),
                    gauge.entity,
                    gauge.participation,
                    format_value(gauge.effective, 0),
                    format_value(gauge.expected, 0)
                ));
            }
        }
        other => content.push_str(missing_note(other)),
    }

    content.push_str("\n🎯 Proficiência média\n");
    match &sections.proficiency {
        Section::Ready(view) => {
            for (kind, mean) in &view.means {
                content.push_str(&format!("   {}: {}\n", kind.label(), format_value(*mean, 0)));
            }
        }
        other => content.push_str(missing_note(other)),
    }

    content.push_str("\n📊 Distribuição por padrão de desempenho\n");
    match &sections.performance {
        Section::Ready(view) => {
            for group in &view.distribution {
                let tiers: Vec<String> = (0..5)
                    .map(|tier| {
                        format!(
                            "N{} {}% ({:.0})",
                            tier + 1,
                            format_value(group.rates[tier], 1),
                            group.counts[tier]
                        )
                    })
                    .collect();
                content.push_str(&format!(
                    "   {} ({}): {}\n",
                    group.kind.label(),
                    group.description,
                    tiers.join(" | ")
                ));
            }
        }
        other => content.push_str(missing_note(other)),
    }

    content.push_str("\n🧩 Taxa de acerto por habilidade\n");
    match &sections.skills {
        Section::Ready(view) => {
            for skill in &view.accuracy {
                content.push_str(&format!(
                    "   {} {} {}: {:.1}%\n",
                    skill.kind.label(),
                    skill.code,
                    skill.description,
                    skill.accuracy
                ));
            }
        }
        other => content.push_str(missing_note(other)),
    }

    for (title, section) in [
        (views::ETHNICITY.title, &sections.ethnicity),
        (views::SOCIOECONOMIC.title, &sections.socioeconomic),
        (views::SEX.title, &sections.sex),
    ] {
        content.push_str(&format!("\n👥 {}\n", title));
        match section {
            Section::Ready(view) => {
                for (kind, groups) in &view.by_kind {
                    content.push_str(&format!("   {}:\n", kind.label()));
                    for group in groups {
                        content.push_str(&format!(
                            "      {}: proficiência {}, taxa {}%, alunos {}\n",
                            group.label,
                            format_value(group.proficiency, 0),
                            format_value(group.rate, 1),
                            format_value(group.count, 0)
                        ));
                    }
                }
            }
            other => content.push_str(missing_note(other)),
        }
    }

    content
}

fn missing_note<T>(section: &Section<T>) -> &'static str {
    match section {
        Section::NoRows => "   Nenhum dado disponível após os filtros\n",
        _ => "   Colunas necessárias não encontradas\n",
    }
}

fn clean_output_directory(output_dir: &str) -> Result<()> {
    let output_path = Path::new(output_dir);

    if !output_path.exists() {
        return Ok(());
    }

    println!("🧹 Cleaning previous results...");

    for entry in fs::read_dir(output_path)? {
        let item_path = entry?.path();
        let is_report = matches!(
            item_path.extension().and_then(|ext| ext.to_str()),
            Some("csv") | Some("txt")
        );

        if item_path.is_file() && is_report {
            fs::remove_file(&item_path)?;
            if let Some(name) = item_path.file_name() {
                println!("   🗑️  Removed file: {}", name.to_string_lossy());
            }
        }
    }

    println!("   ✅ Output directory cleaned");
    Ok(())
}
