use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tempfile::tempdir;
use tessera_common::aspect::{PresetKind, SlotKind};
use tessera_common::error::PipelineError;
use tessera_common::types::{FileRef, UserTransform};
use tessera_pipeline::access::policy::{ScopedSandbox, TokenSealer};
use tessera_pipeline::access::tokens::TokenTable;
use tessera_pipeline::access::{PermissionResolver, Resolution};
use tessera_pipeline::compositor::{encode, Encoding};
use tessera_pipeline::config::PipelineConfig;
use tessera_pipeline::store::package::DocumentPackage;
use tessera_pipeline::{AssetPipeline, EditOutcome, EditRequest, ImportRequest, OriginalPolicy};

const SEAL_KEY: [u8; 32] = [42u8; 32];

fn sandbox(grant: bool) -> Arc<ScopedSandbox> {
    Arc::new(ScopedSandbox::new(TokenSealer::new(SEAL_KEY), move |_: &Path| grant))
}

fn write_photo(path: &Path) {
    let raster = RgbaImage::from_fn(24, 16, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 60, 255]));
    fs::write(path, encode(&raster, Encoding::Png).expect("photo should encode"))
        .expect("photo should be written");
}

#[test]
fn unreadable_path_resolves_after_storing_token() {
    let tmp = tempdir().expect("tempdir should be created");
    let photo = tmp.path().join("photo.png");
    write_photo(&photo);
    let resolver = PermissionResolver::new(sandbox(false));
    let mut tokens = TokenTable::new();

    assert_eq!(resolver.resolve(&photo, &mut tokens), Resolution::NeedsPermission);

    let token = TokenSealer::new(SEAL_KEY).seal(tmp.path());
    resolver.store_token(token, &photo, &mut tokens).expect("token should store");

    assert!(resolver.resolve(&photo, &mut tokens).is_ready());
}

#[tokio::test]
async fn referenced_original_survives_a_new_session_through_its_token() {
    let tmp = tempdir().expect("tempdir should be created");
    let photos = tmp.path().join("photos");
    fs::create_dir_all(&photos).expect("photos dir should be created");
    let photo = photos.join("trip.png");
    write_photo(&photo);
    let package_root = tmp.path().join("album");
    let config = PipelineConfig { default_long_edge: 64, ..PipelineConfig::default() };
    let slot = SlotKind::Preset(PresetKind::Icon);
    let request = ImportRequest {
        original: OriginalPolicy::Reference,
        custom_aspect: None,
        ..ImportRequest::new(slot.clone(), &photo)
    };

    // Session 1: no grant yet, then the user grants the folder.
    let record = {
        let package = DocumentPackage::open(&package_root).expect("package should open");
        let pipeline = AssetPipeline::with_config(package.clone(), sandbox(true), config.clone());
        let mut tokens = package.load_tokens().expect("tokens should load");

        let error = pipeline
            .import(request.clone(), &mut tokens)
            .await
            .expect_err("import without a grant should need permission");
        assert!(matches!(error, PipelineError::NeedsPermission { .. }));

        pipeline.resolver().request_access(&photo, &mut tokens).expect("grant should succeed");
        let record = pipeline.import(request, &mut tokens).await.expect("import should succeed");
        package.save_tokens(&mut tokens).expect("tokens should save");
        record
    };
    assert!(matches!(&record.original, FileRef::External { token_key: Some(_), .. }));

    // Session 2: fresh sandbox that would refuse any prompt.
    let package = DocumentPackage::open(&package_root).expect("package should reopen");
    let pipeline = AssetPipeline::with_config(package.clone(), sandbox(false), config);
    let mut tokens = package.load_tokens().expect("tokens should load");

    let ticket = pipeline.begin_edit(&record);
    let outcome = pipeline
        .apply_edit(
            &ticket,
            &slot,
            &record,
            EditRequest::freeform(UserTransform::new(1.2, 0.0, 0.0, 0.0)),
            &mut tokens,
        )
        .await
        .expect("edit should resolve the original through the stored token");
    assert!(matches!(outcome, EditOutcome::Committed(_)));
}

#[test]
fn refused_grant_is_denied_not_needs_permission() {
    let tmp = tempdir().expect("tempdir should be created");
    let photo = tmp.path().join("photo.png");
    write_photo(&photo);

    let error = PermissionResolver::new(sandbox(false))
        .request_access(&photo, &mut TokenTable::new())
        .expect_err("refused grant should fail");

    assert!(matches!(error, PipelineError::Denied { .. }));
    assert!(!error.is_user_retriable());
}

#[test]
fn vanished_file_is_not_found() {
    let tmp = tempdir().expect("tempdir should be created");
    let photo = tmp.path().join("photo.png");
    write_photo(&photo);
    let resolver = PermissionResolver::new(sandbox(false));
    let mut tokens = TokenTable::new();
    resolver
        .store_token(TokenSealer::new(SEAL_KEY).seal(tmp.path()), &photo, &mut tokens)
        .expect("token should store");

    fs::remove_file(&photo).expect("photo should be removed");

    assert_eq!(resolver.resolve(&photo, &mut tokens), Resolution::NotFound);
}
