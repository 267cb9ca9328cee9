// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use emotion_illustrator::config::AppConfig;
use emotion_illustrator::emotionbridge;
use emotion_illustrator::startup::IllustratorState;
use emotion_illustrator::logging;

fn main() -> anyhow::Result<()> {
    logging::setup_tracing()?;
    let config = AppConfig::load()?;

    tauri::Builder::default()
        .manage(IllustratorState::new(&config))
        .invoke_handler(tauri::generate_handler![
            emotionbridge::form_options,
            emotionbridge::illustrate_emotion,
            emotionbridge::save_artifact
        ])
        .plugin(tauri_plugin_dialog::init())
        .setup(move |app| {
            let handle = app.handle().clone();
            tauri::async_runtime::spawn(emotionbridge::init(handle, config));
            Ok(())
        })
        .run(tauri::generate_context!())?;
    Ok(())
}
