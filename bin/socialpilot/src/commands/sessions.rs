use socialpilot_core::{Paths, Platform};
use socialpilot_storage::SessionStore;

pub fn list(paths: &Paths, platform: Option<&str>) -> anyhow::Result<()> {
    let platforms = match platform {
        Some(p) => vec![Platform::parse(p)?],
        None => Platform::ALL.to_vec(),
    };
    let store = SessionStore::new(paths.clone());

    let mut found = 0;
    for platform in platforms {
        for name in store.list(platform) {
            let Some(session) = store.load(platform, &name) else {
                continue;
            };
            found += 1;
            println!(
                "{:<10} {:<16} handle={:<20} cookies={:<3} saved {}",
                platform.as_str(),
                name,
                session.metadata.handle.as_deref().unwrap_or("-"),
                session.cookies.len(),
                session.metadata.saved_at.format("%Y-%m-%d %H:%M UTC"),
            );
        }
    }
    if found == 0 {
        println!("No saved sessions in {}", paths.sessions_dir().display());
    }
    Ok(())
}
