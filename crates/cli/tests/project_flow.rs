use captioner_core::export::export_directory;
use captioner_core::project::duplicate_directory;
use captioner_core::scanner::{list_media, ScanOptions};
use captioner_core::sidecar::{has_caption, read_caption, write_caption};
use cli::context::AppContext;
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use tempfile::tempdir;

fn seed_dataset(dir: &Path) {
    fs::create_dir_all(dir.join("set/b")).unwrap();
    fs::write(dir.join("one.jpg"), b"jpg").unwrap();
    fs::write(dir.join("one.txt"), b"a dog on a beach").unwrap();
    fs::write(dir.join("two.PNG"), b"png").unwrap();
    fs::write(dir.join("set/clip.mp4"), b"mp4").unwrap();
    fs::write(dir.join("set/b/three.webp"), b"webp").unwrap();
    fs::write(dir.join("set/readme.md"), b"ignored").unwrap();
}

fn relative_set(dir: &Path) -> BTreeSet<String> {
    list_media(dir, &ScanOptions::default())
        .unwrap()
        .into_iter()
        .map(|m| m.relative_path)
        .collect()
}

#[test]
fn duplicated_directory_lists_the_same_media() {
    let temp = tempdir().unwrap();
    let src = temp.path().join("dataset");
    seed_dataset(&src);
    let copy = temp.path().join("copy");

    duplicate_directory(&src, &copy).unwrap();

    let expected: BTreeSet<String> = ["one.jpg", "set/b/three.webp", "set/clip.mp4", "two.PNG"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(relative_set(&src), expected);
    assert_eq!(relative_set(&copy), expected);
    assert_eq!(read_caption(&copy.join("one.jpg")).unwrap(), "a dog on a beach");
}

#[test]
fn caption_round_trip_and_missing_sidecar() {
    let temp = tempdir().unwrap();
    let media = temp.path().join("cat.webp");
    fs::write(&media, b"webp").unwrap();

    assert!(!has_caption(&media));
    assert_eq!(read_caption(&media).unwrap(), "");

    let text = "A tabby cat, curled up on a windowsill.\nSoft morning light.";
    write_caption(&media, text).unwrap();
    assert_eq!(read_caption(&media).unwrap(), text);

    let listed = list_media(temp.path(), &ScanOptions::default()).unwrap();
    assert!(listed[0].has_caption);
}

#[test]
fn imported_project_can_be_listed_and_deleted() {
    let temp = tempdir().unwrap();
    let src = temp.path().join("birds");
    seed_dataset(&src);

    let ctx = AppContext::load(Some(&temp.path().join("data")), None).unwrap();
    let store = ctx.projects();
    let project = store.import(&src).unwrap();

    let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["birds".to_string()]);
    assert_eq!(ctx.resolve_dir("birds").unwrap(), project);

    store.delete(&project).unwrap();
    assert!(store.list().unwrap().is_empty());
    assert!(src.join("one.jpg").exists());
}

#[test]
fn zip_export_contains_every_file() {
    let temp = tempdir().unwrap();
    let src = temp.path().join("export-me");
    seed_dataset(&src);

    let archive = export_directory(&src, &temp.path().join("out"), true).unwrap();
    let name = archive.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("captioner_export_export-me_"));
    assert!(name.ends_with(".zip"));

    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    let mut files = BTreeSet::new();
    for i in 0..zip.len() {
        let entry = zip.by_index(i).unwrap();
        if !entry.is_dir() {
            files.insert(entry.name().to_string());
        }
    }
    let expected: BTreeSet<String> = [
        "one.jpg",
        "one.txt",
        "set/b/three.webp",
        "set/clip.mp4",
        "set/readme.md",
        "two.PNG",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(files, expected);

    let mut caption = String::new();
    zip.by_name("one.txt")
        .unwrap()
        .read_to_string(&mut caption)
        .unwrap();
    assert_eq!(caption, "a dog on a beach");
}

#[test]
fn settings_round_trip_through_context() {
    let temp = tempdir().unwrap();
    let data = temp.path().join("data");
    let ctx = AppContext::load(Some(&data), None).unwrap();
    assert_eq!(ctx.settings_path, data.join("settings.json"));

    let mut stored = ctx.stored_settings().unwrap();
    stored.set_field("model", "gpt-4o-mini").unwrap();
    stored.set_field("batch_concurrency", "2").unwrap();
    ctx.save_settings(&stored).unwrap();

    let reloaded = AppContext::load(Some(&data), None).unwrap();
    assert_eq!(reloaded.settings.model, "gpt-4o-mini");
    assert_eq!(reloaded.settings.batch_concurrency, 2);
    assert!(data.join("working").is_dir());
    assert!(data.join("thumbnails").is_dir());
}
