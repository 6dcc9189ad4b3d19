use bytes::Bytes;
use freshet_engine::config::{OutputProfileConfig, VideoEncodeConfig};
use freshet_engine::media::{
    CodecId, MediaPacket, MediaTrack, PacketFlag, StreamInfo, StreamSourceType, Timebase,
};
use freshet_engine::router::define::{ObserverInfo, ObserverKind, TrackFilter};
use freshet_engine::router::MediaRouter;
use freshet_engine::transcode::backend::NullCodecLibrary;
use freshet_engine::transcode::TranscodeStream;
use std::sync::Arc;
use std::time::Duration;

fn source_stream() -> Arc<StreamInfo> {
    let mut info = StreamInfo::new(1, 7, "live", "camera", StreamSourceType::RtmpPush);
    let mut track = MediaTrack::video(0, CodecId::H264, Timebase::new(1, 1000));
    track.width = 1920;
    track.height = 1080;
    track.framerate = 30.0;
    info.add_track(track);
    Arc::new(info)
}

fn video_profile() -> OutputProfileConfig {
    OutputProfileConfig {
        name: "720p".to_string(),
        output_stream_name: "{input}_720".to_string(),
        video: Some(VideoEncodeConfig {
            codec: "h264".to_string(),
            bitrate: 2_000_000,
            width: 1280,
            height: 720,
            framerate: 30.0,
        }),
        audio: None,
        bypass: false,
    }
}

#[tokio::test]
async fn transcoded_track_pts_is_monotonic_with_min_step() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let source = source_stream();
    let producer = handle.publish(source.clone()).await.unwrap();

    let mut transcode = TranscodeStream::start(
        source.clone(),
        &video_profile(),
        Arc::new(NullCodecLibrary),
        handle.clone(),
    )
    .await
    .unwrap();

    let derived = handle
        .subscribe(
            transcode.derived_identifier.clone(),
            ObserverInfo::new(ObserverKind::WebRtc, TrackFilter::All),
        )
        .await
        .unwrap();

    // Jittery input timestamps, including a stall.
    let input_pts = [0i64, 33, 66, 66, 70, 133, 166];
    for (index, pts) in input_pts.iter().enumerate() {
        producer.push(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::from_static(b"frame"),
            pts: *pts,
            dts: *pts,
            duration: 33,
            timebase: Timebase::new(1, 1000),
            flag: if index == 0 { PacketFlag::Key } else { PacketFlag::Delta },
            fragmentation: None,
        });
    }

    let frame_duration = 3000; // 90000 / 30
    let mut last_pts = i64::MIN;
    for _ in 0..input_pts.len() {
        let packet = tokio::time::timeout(Duration::from_secs(2), derived.recv())
            .await
            .expect("transcoded packet timed out")
            .expect("derived stream closed early");
        assert!(packet.duration >= 0);
        if last_pts != i64::MIN {
            assert!(
                packet.pts >= last_pts + frame_duration,
                "pts {} advanced less than a frame duration from {last_pts}",
                packet.pts
            );
        }
        last_pts = packet.pts;
    }

    transcode.stop(&handle).await;
    assert!(handle.stream_info(&transcode.derived_identifier).is_none());
}

#[tokio::test]
async fn bypass_profile_forwards_packets_untouched() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let source = source_stream();
    let producer = handle.publish(source.clone()).await.unwrap();

    let mut transcode = TranscodeStream::start(
        source.clone(),
        &OutputProfileConfig::default(),
        Arc::new(NullCodecLibrary),
        handle.clone(),
    )
    .await
    .unwrap();

    let derived = handle
        .subscribe(
            transcode.derived_identifier.clone(),
            ObserverInfo::new(ObserverKind::Hls, TrackFilter::All),
        )
        .await
        .unwrap();

    producer.push(MediaPacket {
        track_id: 0,
        codec_id: CodecId::H264,
        data: Bytes::from_static(b"identical"),
        pts: 42,
        dts: 42,
        duration: 33,
        timebase: Timebase::new(1, 1000),
        flag: PacketFlag::Key,
        fragmentation: None,
    });

    let packet = tokio::time::timeout(Duration::from_secs(2), derived.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet.pts, 42);
    assert_eq!(&packet.data[..], b"identical");

    transcode.stop(&handle).await;
}
