//! Virtual scan device backed by a directory of page files.
//!
//! Each scan job streams the regular files of the configured directory
//! as document pages, in file-name order. This gives the daemon a
//! complete end-to-end path without any driver backend: the job factory
//! contract is the same one a WIA/TWAIN/SANE bridge would implement.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use scanpost_core::config::DeviceSection;
use scanpost_core::device::{DeviceConfig, JobFactory, ScannerCapabilities};
use scanpost_core::error::ScanpostError;
use scanpost_core::job::DynScanJob;
use scanpost_page_pipeline::{PageProducer, PipelineConfig, PipelineJobBuilder};

/// Build a `DeviceConfig` for one `[[device]]` section.
///
/// The advertised capabilities are the virtual scanner defaults with
/// the configured make/model; the device UUID is generated per daemon
/// start.
pub fn device_from_section(section: &DeviceSection, pipeline: &PipelineConfig) -> DeviceConfig {
    let capabilities = ScannerCapabilities {
        make_and_model: section.make_and_model.clone(),
        serial_number: section.name.clone(),
        uuid: uuid::Uuid::new_v4().to_string(),
        ..Default::default()
    };
    let factory = directory_factory(PathBuf::from(&section.source_dir), pipeline.clone());
    DeviceConfig::new(section.name.clone(), capabilities, factory)
        .with_port(section.port)
        .with_tls_port(section.tls_port)
}

/// Job factory streaming the files of `source_dir` as pages.
pub fn directory_factory(source_dir: PathBuf, pipeline: PipelineConfig) -> JobFactory {
    Arc::new(move |settings| {
        let dir = source_dir.clone();
        let producer: PageProducer = Box::new(move |sink| {
            Box::pin(async move {
                let mut pages = Vec::new();
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file() {
                        pages.push(entry.path());
                    }
                }
                // File-name order doubles as page order
                pages.sort();

                let total = pages.len();
                for (index, path) in pages.into_iter().enumerate() {
                    let data = tokio::fs::read(&path).await?;
                    sink.progress(index as f64 / total.max(1) as f64);
                    if sink.push(Bytes::from(data)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            })
        });

        let job = PipelineJobBuilder::new()
            .content_type(settings.document_format.clone())
            .config(pipeline.clone())
            .producer(producer)
            .build()
            .map_err(ScanpostError::from)?;
        Ok(job as Arc<dyn DynScanJob>)
    })
}
