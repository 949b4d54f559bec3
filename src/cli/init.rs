use crate::compose::Components;
use crate::error::Result;
use crate::settings::{
    components_path, load_settings, save_settings, settings_file_exists, shellexpand_path,
};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let existed = settings_file_exists();
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }

    let data_dir = settings.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(settings.letters_dir())?;
    std::fs::create_dir_all(settings.groups_dir())?;
    std::fs::create_dir_all(settings.outbox_dir())?;
    save_settings(&settings)?;

    // Give curators an editable copy of the letter components
    let components = components_path();
    if !components.exists() {
        Components::default().save(&components)?;
    }

    if existed {
        println!("Updated existing settings.");
    }
    println!("Data dir:    {}", data_dir.display());
    println!("Letters:     {}", settings.letters_dir().display());
    println!("Groups:      {}", settings.groups_dir().display());
    println!("Components:  {}", components.display());
    println!();
    println!(
        "Edit the dunner identity (name, email, addresses) in your settings \
         file before the first real run."
    );
    Ok(())
}
