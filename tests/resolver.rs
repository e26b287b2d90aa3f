mod common;

use std::{sync::Arc, time::Duration};

use jukebot::{
    backend::{Backend, BackendKind, Candidate},
    error::ErrorKind,
    resolver::Query,
};

use common::{resolver, Mock};

fn backends(backends: &[&Arc<Mock>]) -> Vec<Arc<dyn Backend>> {
    backends
        .iter()
        .map(|backend| Arc::clone(backend) as Arc<dyn Backend>)
        .collect()
}

#[tokio::test]
async fn classifies_queries() {
    let youtube = Arc::new(Mock::youtube());
    let soundcloud = Arc::new(Mock::soundcloud());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    assert_eq!(
        resolver.classify("  never gonna give you up "),
        Query::Search("never gonna give you up".to_owned())
    );
    assert_eq!(
        resolver.classify(soundcloud.url("artist/tune").as_str()),
        Query::Url {
            backend: BackendKind::SoundCloud,
            url: soundcloud.url("artist/tune"),
        }
    );
    assert_eq!(
        resolver.classify("https://example.com/tune"),
        Query::Search("https://example.com/tune".to_owned())
    );
}

#[tokio::test]
async fn searches_are_cached() {
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube]));

    let first = resolver.resolve("Song", "tester").await.unwrap();
    let second = resolver.resolve("  song", "tester").await.unwrap();
    assert_eq!(youtube.queries(), ["Song"]);
    assert_eq!(first.url(), second.url());
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn unavailable_backend_falls_back_with_hint() {
    let youtube = Arc::new(Mock::youtube());
    let soundcloud = Arc::new(Mock::soundcloud());
    youtube.fail_searches(Some(ErrorKind::Unavailable));
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let track = resolver.resolve("song", "tester").await.unwrap();
    assert_eq!(track.backend(), BackendKind::SoundCloud);
    assert_eq!(track.label(), "SoundCloud (YouTube unavailable)");
    assert_eq!(soundcloud.queries(), ["song YouTube"]);
}

#[tokio::test]
async fn empty_results_fall_back_with_plain_query() {
    let youtube = Arc::new(Mock::youtube().silent());
    let soundcloud = Arc::new(Mock::soundcloud());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let track = resolver.resolve("song", "tester").await.unwrap();
    assert_eq!(track.label(), "SoundCloud (YouTube fallback)");
    assert_eq!(soundcloud.queries(), ["song"]);

    // Errors that are not about availability are treated the same.
    youtube.fail_searches(Some(ErrorKind::InvalidArgument));
    resolver.resolve("other", "tester").await.unwrap();
    assert_eq!(soundcloud.queries(), ["song", "other"]);
}

#[tokio::test]
async fn gives_up_without_error() {
    let youtube = Arc::new(Mock::youtube());
    let soundcloud = Arc::new(Mock::soundcloud());
    youtube.fail_searches(Some(ErrorKind::DeadlineExceeded));
    soundcloud.fail_searches(Some(ErrorKind::ResourceExhausted));
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    assert!(resolver.resolve("song", "tester").await.is_none());
    assert!(resolver.resolve("", "tester").await.is_none());
}

#[tokio::test]
async fn unstreamable_results_are_skipped() {
    let youtube = Mock::youtube();
    let blocked = Candidate {
        streamable: false,
        ..youtube.candidate("blocked")
    };
    let youtube = Arc::new(youtube.with_result(
        "song",
        vec![blocked, Candidate {
            title: "song (live)".to_owned(),
            ..Mock::youtube().candidate("song live")
        }],
    ));
    let resolver = resolver(backends(&[&youtube]));

    let track = resolver.resolve("song", "tester").await.unwrap();
    assert_eq!(track.title(), "song (live)");
}

#[tokio::test]
async fn catalog_urls_stream_from_primary() {
    let spotify = Mock::spotify();
    let url = spotify.url("track/1");
    let spotify = Arc::new(spotify.with_item(Candidate {
        title: "Around the World".to_owned(),
        artist: Some("Daft Punk".to_owned()),
        url: url.clone(),
        duration: Some(Duration::from_secs(429)),
        thumbnail: None,
        streamable: false,
    }));

    let youtube = Mock::youtube().silent();
    let video = Candidate {
        title: "Daft Punk - Around The World (Official Audio)".to_owned(),
        ..youtube.candidate("watch-dp")
    };
    let youtube = Arc::new(youtube.with_result("Daft Punk Around the World", vec![video.clone()]));
    let resolver = resolver(backends(&[&youtube, &spotify]));

    let track = resolver.resolve(url.as_str(), "tester").await.unwrap();
    assert_eq!(track.title(), "Around the World");
    assert_eq!(track.artist(), Some("Daft Punk"));
    assert_eq!(track.duration(), Some(Duration::from_secs(429)));
    assert_eq!(track.url(), &video.url);
    assert_eq!(track.backend(), BackendKind::YouTube);
    assert_eq!(track.label(), "Spotify → YouTube");
}

#[tokio::test]
async fn unstreamable_urls_are_searched_elsewhere() {
    let soundcloud = Mock::soundcloud();
    let tune = Candidate {
        artist: Some("Artist".to_owned()),
        streamable: false,
        ..soundcloud.candidate("tune")
    };
    let soundcloud = Arc::new(soundcloud.with_item(tune.clone()));
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let track = resolver.resolve(tune.url.as_str(), "tester").await.unwrap();
    assert_eq!(track.backend(), BackendKind::YouTube);
    assert_eq!(track.label(), "YouTube (SoundCloud fallback)");
    assert_eq!(youtube.queries(), ["Artist tune"]);
}

#[tokio::test]
async fn missing_urls_are_searched_by_slug() {
    let soundcloud = Arc::new(Mock::soundcloud());
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let url = soundcloud.url("daft-punk/one-more-time");
    let track = resolver.resolve(url.as_str(), "tester").await.unwrap();
    assert_eq!(track.title(), "daft punk one more time");
    assert_eq!(track.backend(), BackendKind::YouTube);
}

#[tokio::test]
async fn missing_id_urls_are_not_found() {
    let youtube = Arc::new(Mock::youtube());
    let soundcloud = Arc::new(Mock::soundcloud());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let url = youtube.url("watch?v=dQw4w9WgXcQ");
    assert!(resolver.resolve(url.as_str(), "tester").await.is_none());
    assert!(youtube.queries().is_empty());
    assert!(soundcloud.queries().is_empty());
}

#[tokio::test]
async fn streams_are_cached() {
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube]));

    let mut first = resolver.resolve("song", "tester").await.unwrap();
    let mut second = resolver.resolve("song", "tester").await.unwrap();
    let handle = resolver.acquire(&mut first).await.unwrap();
    assert_eq!(resolver.acquire(&mut second).await.unwrap(), handle);
    assert_eq!(youtube.stream_calls(), 1);

    // An attached stream is reused without a lookup.
    assert_eq!(first.stream(), Some(&handle));
    resolver.acquire(&mut first).await.unwrap();
    assert_eq!(youtube.stream_calls(), 1);
}

#[tokio::test]
async fn failing_secondary_streams_are_substituted() {
    let soundcloud = Mock::soundcloud();
    let tune = soundcloud.candidate("tune");
    let soundcloud = Arc::new(soundcloud.with_item(tune.clone()));
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube, &soundcloud]));

    let mut track = resolver.resolve(tune.url.as_str(), "tester").await.unwrap();
    assert_eq!(track.backend(), BackendKind::SoundCloud);

    soundcloud.fail_streams(Some(ErrorKind::PermissionDenied));
    let handle = resolver.acquire(&mut track).await.unwrap();
    assert_eq!(handle.url().host_str(), Some("youtube.test"));
    assert_eq!(track.backend(), BackendKind::YouTube);
    assert_eq!(track.label(), "YouTube (SoundCloud fallback)");
    assert_eq!(track.title(), "tune");
}

#[tokio::test]
async fn failing_primary_streams_are_errors() {
    let youtube = Arc::new(Mock::youtube());
    let resolver = resolver(backends(&[&youtube]));
    let mut track = resolver.resolve("song", "tester").await.unwrap();

    youtube.fail_streams(Some(ErrorKind::DataLoss));
    let error = resolver.acquire(&mut track).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::DataLoss);
}
