use crate::{
    error::{Result, StabilityError},
    logger,
    models::SaveResult,
    proto::{artifact, Answer, Artifact, ArtifactType},
};
use async_trait::async_trait;
use chrono::Local;
use futures::{future::try_join_all, Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const FILE_EXTENSION: &str = "png";
const TIMESTAMP_FORMAT: &str = "%m-%d-%y_%H-%M-%S";

/// Helpers that drain a generation response stream and save its images.
///
/// Implemented for every stream of `Result<Answer, E>`, which covers the
/// `tonic::Streaming<Answer>` returned by `StabilityClient::generate`.
/// Both methods race the cancellation token against every stream read and
/// every filesystem call; files already written stay on disk when it fires.
#[async_trait]
pub trait AnswerStreamExt {
    /// Saves every image artifact of every answer into `directory_path`.
    ///
    /// Files are named `{MM-dd-yy_HH-mm-ss}-{uuid}.png`. The images of one
    /// answer are written concurrently and all of them finish before the next
    /// answer is read. The directory must already exist.
    async fn save_all_images(
        &mut self,
        directory_path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SaveResult>>;

    /// Saves the first image artifact as `{file_name}.png` and stops reading.
    ///
    /// When that file already exists the image is saved as
    /// `{file_name}-{uuid}.png` instead. The check happens right before the
    /// write and is not atomic, so concurrent callers using the same name can
    /// still overwrite each other.
    ///
    /// A stream without images returns a `SaveResult` whose path is empty;
    /// check [`SaveResult::is_saved`].
    async fn save_single_image(
        &mut self,
        directory_path: &str,
        file_name: &str,
        token: &CancellationToken,
    ) -> Result<SaveResult>;
}

#[async_trait]
impl<S, E> AnswerStreamExt for S
where
    S: Stream<Item = std::result::Result<Answer, E>> + Unpin + Send,
    E: Into<StabilityError> + Send + 'static,
{
    async fn save_all_images(
        &mut self,
        directory_path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SaveResult>> {
        let directory = resolve_directory(directory_path)?;
        let _timer = logger::timer("save_all_images");
        let mut results = Vec::new();

        while let Some(answer) = next_answer(self, token).await? {
            let writes = answer
                .artifacts
                .iter()
                .filter(|artifact| is_image(artifact))
                .map(|artifact| {
                    let path = directory.join(generated_file_name());
                    write_image(path, payload(artifact), token)
                });

            let saved = try_join_all(writes).await?;
            log::debug!(
                "Saved {} image(s) from answer {}",
                saved.len(),
                answer.answer_id
            );
            results.extend(saved);
        }

        log::info!(
            "Saved {} image(s) to {}",
            results.len(),
            directory.display()
        );
        Ok(results)
    }

    async fn save_single_image(
        &mut self,
        directory_path: &str,
        file_name: &str,
        token: &CancellationToken,
    ) -> Result<SaveResult> {
        let directory = resolve_directory(directory_path)?;

        while let Some(answer) = next_answer(self, token).await? {
            if let Some(artifact) = answer.artifacts.iter().find(|a| is_image(a)) {
                let path = named_file_path(&directory, file_name, token).await?;
                let saved = write_image(path, payload(artifact), token).await?;
                log::info!("Saved image to {}", saved.full_path().display());
                return Ok(saved);
            }
        }

        log::warn!("Response stream ended without an image artifact");
        Ok(SaveResult::default())
    }
}

async fn next_answer<S, E>(stream: &mut S, token: &CancellationToken) -> Result<Option<Answer>>
where
    S: Stream<Item = std::result::Result<Answer, E>> + Unpin,
    E: Into<StabilityError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StabilityError::Cancelled),
        next = stream.next() => next.transpose().map_err(Into::into),
    }
}

async fn write_image(path: PathBuf, content: &[u8], token: &CancellationToken) -> Result<SaveResult> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StabilityError::Cancelled),
        written = tokio::fs::write(path.clone(), content) => {
            written?;
            log::debug!("Wrote {} bytes to {}", content.len(), path.display());
            Ok(SaveResult::new(path))
        }
    }
}

fn resolve_directory(directory_path: &str) -> Result<PathBuf> {
    if directory_path.is_empty() {
        return Err(StabilityError::invalid_argument(
            "Directory path cannot be empty",
        ));
    }
    Ok(std::path::absolute(directory_path)?)
}

fn generated_file_name() -> String {
    format!(
        "{}-{}.{}",
        Local::now().format(TIMESTAMP_FORMAT),
        Uuid::new_v4(),
        FILE_EXTENSION
    )
}

async fn named_file_path(
    directory: &Path,
    file_name: &str,
    token: &CancellationToken,
) -> Result<PathBuf> {
    let path = directory.join(format!("{file_name}.{FILE_EXTENSION}"));
    let exists: Result<bool> = tokio::select! {
        biased;
        _ = token.cancelled() => Err(StabilityError::Cancelled),
        exists = tokio::fs::try_exists(&path) => exists.map_err(StabilityError::from),
    };
    if exists? {
        return Ok(directory.join(format!("{file_name}-{}.{FILE_EXTENSION}", Uuid::new_v4())));
    }
    Ok(path)
}

fn is_image(artifact: &Artifact) -> bool {
    artifact.r#type == ArtifactType::ArtifactImage as i32
}

fn payload(artifact: &Artifact) -> &[u8] {
    match &artifact.data {
        Some(artifact::Data::Binary(binary)) => binary,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::RequestBuilder;
    use crate::proto::{prompt, Prompt};
    use futures::stream;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn dir_path(dir: &TempDir) -> &str {
        dir.path().to_str().unwrap()
    }

    fn file_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn artifact(kind: ArtifactType, binary: &[u8]) -> Artifact {
        Artifact {
            r#type: kind as i32,
            data: Some(artifact::Data::Binary(binary.to_vec())),
            ..Default::default()
        }
    }

    fn answer(artifacts: Vec<Artifact>) -> Answer {
        Answer {
            answer_id: Uuid::new_v4().to_string(),
            artifacts,
            ..Default::default()
        }
    }

    fn answers(
        items: Vec<Answer>,
    ) -> impl Stream<Item = std::result::Result<Answer, tonic::Status>> + Unpin + Send {
        stream::iter(items.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_save_all_images_one_per_answer() {
        for count in [0usize, 1, 10] {
            let dir = tempdir().unwrap();
            let items = (0..count)
                .map(|i| answer(vec![artifact(ArtifactType::ArtifactImage, &[i as u8; 16])]))
                .collect();

            let results = answers(items)
                .save_all_images(dir_path(&dir), &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(results.len(), count);
            let expected_dir = std::path::absolute(dir.path()).unwrap();
            let mut paths: Vec<_> = results.iter().map(|r| r.full_path().to_path_buf()).collect();
            for path in &paths {
                assert!(path.starts_with(&expected_dir));
                assert_eq!(path.extension().unwrap(), FILE_EXTENSION);
                assert!(path.exists());
            }
            paths.sort();
            paths.dedup();
            assert_eq!(paths.len(), count);
        }
    }

    #[tokio::test]
    async fn test_save_all_images_skips_non_image_artifacts() {
        let dir = tempdir().unwrap();
        let items = vec![
            answer(vec![
                artifact(ArtifactType::ArtifactImage, b"first"),
                artifact(ArtifactType::ArtifactMask, b"mask"),
                artifact(ArtifactType::ArtifactText, b"text"),
                artifact(ArtifactType::ArtifactImage, b"second"),
            ]),
            answer(vec![]),
        ];

        let results = answers(items)
            .save_all_images(dir_path(&dir), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(file_count(&dir), 2);
        let mut contents: Vec<_> = results
            .iter()
            .map(|r| std::fs::read(r.full_path()).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_save_all_images_empty_directory_fails_before_reading() {
        let (tx, rx) = mpsc::channel::<std::result::Result<Answer, tonic::Status>>(1);
        tx.send(Ok(answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])))
            .await
            .unwrap();
        let mut stream = ReceiverStream::new(rx);

        let err = stream
            .save_all_images("", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        // The queued answer is still there.
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn test_save_all_images_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let items = vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])];

        let err = answers(items)
            .save_all_images(missing.to_str().unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StabilityError::Io(_)));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_save_all_images_reads_live_stream() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let producer = tokio::spawn(async move {
            for i in 0..3u8 {
                let item = answer(vec![artifact(ArtifactType::ArtifactImage, &[i])]);
                tx.send(Ok::<_, tonic::Status>(item)).await.unwrap();
            }
        });

        let results = ReceiverStream::new(rx)
            .save_all_images(dir_path(&dir), &CancellationToken::new())
            .await
            .unwrap();
        producer.await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(file_count(&dir), 3);
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let dir = tempdir().unwrap();
        let items = vec![
            Ok(answer(vec![artifact(ArtifactType::ArtifactImage, b"ok")])),
            Err(tonic::Status::internal("stream fault")),
        ];

        let err = stream::iter(items)
            .save_all_images(dir_path(&dir), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            StabilityError::Status(status) => assert_eq!(status.code(), tonic::Code::Internal),
            other => panic!("unexpected error: {other:?}"),
        }
        // Files written before the failure stay on disk.
        assert_eq!(file_count(&dir), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_without_writing() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let items = vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])];

        let err = answers(items)
            .save_all_images(dir_path(&dir), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let err = answers(vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])])
            .save_single_image(dir_path(&dir), "single", &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_next_answer() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel::<std::result::Result<Answer, tonic::Status>>(1);
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = ReceiverStream::new(rx)
            .save_all_images(dir_path(&dir), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_after_answer_received_skips_write() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        let err = answers(vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])])
            .inspect(move |_| canceller.cancel())
            .save_all_images(dir_path(&dir), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let canceller = token.clone();
        let err = answers(vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"x")])])
            .inspect(move |_| canceller.cancel())
            .save_single_image(dir_path(&dir), "single", &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_failed_write_fails_whole_answer() {
        let dir = tempdir().unwrap();
        let not_a_directory = dir.path().join("occupied");
        std::fs::write(&not_a_directory, b"keep").unwrap();
        let items = vec![answer(vec![
            artifact(ArtifactType::ArtifactImage, b"first"),
            artifact(ArtifactType::ArtifactImage, b"second"),
        ])];

        let err = answers(items)
            .save_all_images(not_a_directory.to_str().unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Io(_)));
        assert_eq!(std::fs::read(&not_a_directory).unwrap(), b"keep");
        assert_eq!(file_count(&dir), 1);
    }

    #[tokio::test]
    async fn test_save_single_image_disambiguates_existing_name() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();

        let first = answers(vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"1")])])
            .save_single_image(dir_path(&dir), "test", &token)
            .await
            .unwrap();
        let second = answers(vec![answer(vec![artifact(ArtifactType::ArtifactImage, b"2")])])
            .save_single_image(dir_path(&dir), "test", &token)
            .await
            .unwrap();

        assert_eq!(first.full_path().file_name().unwrap(), "test.png");
        assert_ne!(first.full_path(), second.full_path());
        assert!(
            second.full_path().as_os_str().len() > first.full_path().as_os_str().len()
        );
        let second_name = second.full_path().file_name().unwrap().to_str().unwrap();
        assert!(second_name.starts_with("test-"));
        assert!(second_name.ends_with(".png"));
        assert_eq!(std::fs::read(first.full_path()).unwrap(), b"1");
        assert_eq!(std::fs::read(second.full_path()).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_save_single_image_stops_at_first_image() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok::<_, tonic::Status>(answer(vec![artifact(
            ArtifactType::ArtifactMask,
            b"mask",
        )])))
        .await
        .unwrap();
        tx.send(Ok(answer(vec![
            artifact(ArtifactType::ArtifactImage, b"wanted"),
            artifact(ArtifactType::ArtifactImage, b"skipped"),
        ])))
        .await
        .unwrap();
        tx.send(Ok(answer(vec![artifact(ArtifactType::ArtifactImage, b"later")])))
            .await
            .unwrap();
        let mut stream = ReceiverStream::new(rx);

        let result = stream
            .save_single_image(dir_path(&dir), "first", &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_saved());
        assert_eq!(std::fs::read(result.full_path()).unwrap(), b"wanted");
        assert_eq!(file_count(&dir), 1);
        // The rest of the stream is left unread.
        let remaining = stream.next().await.unwrap().unwrap();
        assert_eq!(payload(&remaining.artifacts[0]), b"later");
    }

    #[tokio::test]
    async fn test_save_single_image_without_images_returns_empty_path() {
        let dir = tempdir().unwrap();
        let items = vec![answer(vec![artifact(ArtifactType::ArtifactMask, b"mask")])];

        let result = answers(items)
            .save_single_image(dir_path(&dir), "nothing", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.is_saved());
        assert_eq!(file_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_save_single_image_empty_directory_fails() {
        let err = answers(vec![])
            .save_single_image("", "name", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_init_image_bytes_round_trip_unchanged() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.png");
        let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(&source, &original).unwrap();

        let request = RequestBuilder::new()
            .with_init_image(&source)
            .unwrap()
            .build()
            .unwrap();
        let echoed = match &request.prompt[0] {
            Prompt {
                prompt: Some(prompt::Prompt::Artifact(artifact)),
                ..
            } => artifact.clone(),
            other => panic!("expected an artifact prompt, got {other:?}"),
        };

        let results = answers(vec![answer(vec![echoed])])
            .save_all_images(dir_path(&dir), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(std::fs::read(results[0].full_path()).unwrap(), original);
    }

    #[test]
    fn test_generated_file_name_format() {
        let name = generated_file_name();
        assert!(name.ends_with(".png"));
        // MM-dd-yy_HH-mm-ss, a dash, then a hyphenated uuid
        let (timestamp, rest) = name.split_at(17);
        assert_eq!(timestamp.as_bytes()[8], b'_');
        assert!(rest.starts_with('-'));
        let id = rest.trim_start_matches('-').trim_end_matches(".png");
        assert!(Uuid::parse_str(id).is_ok());
    }
}
