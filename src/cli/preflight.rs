use crate::cli::resolve_export_path;
use crate::error::Result;
use crate::export;
use crate::preflight;
use crate::settings::load_settings;

pub fn build(export_file: Option<&str>, format: Option<&str>) -> Result<()> {
    regenerate(export_file, format, true)
}

pub fn diff(export_file: Option<&str>, format: Option<&str>) -> Result<()> {
    regenerate(export_file, format, false)
}

fn regenerate(export_file: Option<&str>, format: Option<&str>, persist: bool) -> Result<()> {
    let settings = load_settings();
    let today = chrono::Local::now().date_naive();
    let export_path = resolve_export_path(&settings, export_file);
    let transactions = export::read_export(&export_path, format)?;
    let new_rows = preflight::build_rows(&transactions, &settings, today)?;

    let preflight_path = settings.preflight_path();
    match preflight::load(&preflight_path)? {
        None => {
            if persist {
                std::fs::create_dir_all(settings.data_dir())?;
                preflight::save(&new_rows, &preflight_path, true)?;
                println!(
                    "Created {} with {} rows.",
                    preflight_path.display(),
                    new_rows.len()
                );
            } else {
                println!(
                    "No saved preflight. A build would create {} with {} rows.",
                    preflight_path.display(),
                    new_rows.len()
                );
            }
        }
        Some(old_rows) => {
            let outcome = preflight::merge(&new_rows, &old_rows, today, settings.recent_days);
            outcome.diff.print();
            if persist && !outcome.diff.is_empty() {
                preflight::save(&outcome.rows, &preflight_path, true)?;
                println!("Updated {}.", preflight_path.display());
            }
        }
    }
    Ok(())
}
