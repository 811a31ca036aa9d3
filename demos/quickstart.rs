use anyhow::Result;
use cua_runtime::browser::ChromiumLauncher;
use cua_runtime::config::{ConfigurationSource, EnvConfiguration};
use cua_runtime::provision::create_vm_instance;
use cua_runtime::report::{terminal_status, ReportGenerator};
use cua_runtime::{render, ActionRequest, SessionManager, SessionProvider};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = EnvConfiguration.configuration_with_defaults()?;
    let manager = SessionManager::with_viewport(ChromiumLauncher::from_env(), settings.viewport);

    let Some(instance) = create_vm_instance(&manager, &settings, None).await? else {
        return Ok(());
    };
    println!("instance {} streaming at {}", instance.instance_id, instance.stream_url);
    let session = manager.get(&instance.instance_id).await?;

    let steps = [
        json!({"action": "take_screenshot"}),
        json!({"action": "click_mouse", "coordinates": [640, 360]}),
        json!({"action": "type_text", "text": "hello from the harness"}),
        json!({"action": "press_key", "keys": ["ctrl", "a"]}),
        json!({"action": "scroll", "coordinates": [640, 360], "delta_y": 400}),
    ];

    let mut recorder = ReportGenerator::new();
    recorder.start();
    for (i, raw) in steps.iter().enumerate() {
        let request = ActionRequest::decode(raw)?;
        let call_id = format!("call_{i}");
        if let Some(outcome) =
            cua_runtime::execute_recorded(&session, &request, &call_id, &mut recorder).await?
        {
            println!("{call_id}: captured {} base64 bytes", outcome.base64_image.len());
        }
    }

    let failed = recorder.report().map(|r| r.failed_actions()).unwrap_or(0);
    recorder.finish(terminal_status(failed), Some(&instance.instance_id))?;
    manager.close(&instance.instance_id).await?;

    if let Some(report) = recorder.report() {
        render::print_summary(report);
    }
    Ok(())
}
