//! Machine image resolution against the cloud profile

use kubevirt_common::crd::{CloudProfileConfig, MachineImage, WorkerPool};
use kubevirt_common::{Error, Result};

/// Find the download location of an image name/version
///
/// Name and version are compared verbatim; "16.04" and "16.4" are different
/// versions.
pub fn find_image_source<'a>(
    config: &'a CloudProfileConfig,
    name: &str,
    version: &str,
) -> Result<&'a str> {
    config
        .machine_images
        .iter()
        .filter(|image| image.name == name)
        .flat_map(|image| image.versions.iter())
        .find(|v| v.version == version)
        .map(|v| v.source_url.as_str())
        .ok_or_else(|| Error::image_not_found(name, version))
}

/// Resolve every pool's image, failing on the first unknown one
///
/// The result holds each distinct name/version once, in the order pools
/// first mention it.
pub fn resolve_pool_images(
    pools: &[WorkerPool],
    config: &CloudProfileConfig,
) -> Result<Vec<MachineImage>> {
    let mut images: Vec<MachineImage> = Vec::new();
    for pool in pools {
        let image = &pool.machine_image;
        let source_url = find_image_source(config, &image.name, &image.version)?;
        let seen = images
            .iter()
            .any(|i| i.name == image.name && i.version == image.version);
        if !seen {
            images.push(MachineImage {
                name: image.name.clone(),
                version: image.version.clone(),
                source_url: source_url.to_string(),
            });
        }
    }
    Ok(images)
}
