use bytes::Bytes;
use freshet_engine::media::{
    CodecId, MediaPacket, PacketFlag, StreamInfo, StreamSourceType, Timebase,
};
use freshet_engine::router::define::{ObserverInfo, ObserverKind, OverflowPolicy, TrackFilter};
use freshet_engine::router::MediaRouter;
use std::sync::Arc;
use std::time::Duration;

fn stream_info(name: &str) -> Arc<StreamInfo> {
    Arc::new(StreamInfo::new(1, 100, "live", name, StreamSourceType::RtmpPush))
}

fn video_packet(pts: i64, key: bool) -> MediaPacket {
    MediaPacket {
        track_id: 0,
        codec_id: CodecId::H264,
        data: Bytes::from(pts.to_be_bytes().to_vec()),
        pts,
        dts: pts,
        duration: 33,
        timebase: Timebase::new(1, 1000),
        flag: if key { PacketFlag::Key } else { PacketFlag::Delta },
        fragmentation: None,
    }
}

#[tokio::test]
async fn fan_out_preserves_order_and_bytes() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let info = stream_info("order");
    let producer = handle.publish(info.clone()).await.unwrap();

    let a = handle
        .subscribe(info.identifier(), ObserverInfo::new(ObserverKind::Hls, TrackFilter::All))
        .await
        .unwrap();
    let b = handle
        .subscribe(info.identifier(), ObserverInfo::new(ObserverKind::WebRtc, TrackFilter::All))
        .await
        .unwrap();

    for pts in 0..50 {
        producer.push(video_packet(pts, pts == 0));
    }

    for conn in [&a, &b] {
        for pts in 0..50 {
            let packet = tokio::time::timeout(Duration::from_secs(1), conn.recv())
                .await
                .expect("timed out")
                .expect("queue closed early");
            assert_eq!(packet.pts, pts);
            assert_eq!(&packet.data[..], &pts.to_be_bytes()[..]);
        }
    }
}

#[tokio::test]
async fn slow_observer_never_blocks_producer_and_sees_monotonic_subsequence() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let info = stream_info("overflow");
    let producer = handle.publish(info.clone()).await.unwrap();

    let slow = handle
        .subscribe(
            info.identifier(),
            ObserverInfo::new(ObserverKind::WebRtc, TrackFilter::All)
                .with_policy(OverflowPolicy::DropNewest),
        )
        .await
        .unwrap();

    // Push far more packets than the observer queue can hold without
    // draining it. The producer must stay unblocked throughout.
    let burst = 10_000;
    for pts in 0..burst {
        producer.push(video_packet(pts, pts == 0));
    }
    // Let the dispatcher drain its inbound channel.
    tokio::time::sleep(Duration::from_millis(200)).await;

    drop(producer);

    let mut last = i64::MIN;
    let mut received = 0usize;
    while let Ok(Some(packet)) = tokio::time::timeout(Duration::from_secs(1), slow.recv()).await {
        assert!(packet.pts > last, "subsequence must stay monotonic");
        last = packet.pts;
        received += 1;
    }
    assert!(received > 0);
    assert!(received < burst as usize, "overflow must have dropped packets");
}

#[tokio::test]
async fn late_observer_receives_contiguous_suffix_from_gop_start() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let info = stream_info("late-join");
    let producer = handle.publish(info.clone()).await.unwrap();

    producer.push(video_packet(0, true));
    producer.push(video_packet(33, false));
    producer.push(video_packet(66, true)); // second GOP starts here
    producer.push(video_packet(99, false));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let late = handle
        .subscribe(info.identifier(), ObserverInfo::new(ObserverKind::WebRtc, TrackFilter::All))
        .await
        .unwrap();
    drop(producer);

    let first = tokio::time::timeout(Duration::from_secs(1), late.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_key());
    assert_eq!(first.pts, 66);

    let mut last = first.pts;
    while let Ok(Some(packet)) = tokio::time::timeout(Duration::from_millis(200), late.recv()).await
    {
        assert!(packet.pts > last);
        last = packet.pts;
    }
    assert_eq!(last, 99);
}

#[tokio::test]
async fn duplicate_registration_fails() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let info = stream_info("dup");
    let _producer = handle.publish(info.clone()).await.unwrap();
    assert!(handle.publish(info).await.is_err());
}

#[tokio::test]
async fn track_filter_limits_delivery() {
    let router = MediaRouter::new();
    let handle = router.handle();
    tokio::spawn(router.run());

    let info = stream_info("filter");
    let producer = handle.publish(info.clone()).await.unwrap();

    let audio_only = handle
        .subscribe(
            info.identifier(),
            ObserverInfo::new(ObserverKind::Hls, TrackFilter::AudioOnly),
        )
        .await
        .unwrap();

    producer.push(video_packet(0, true));
    let mut audio = video_packet(10, false);
    audio.track_id = 1;
    audio.codec_id = CodecId::Aac;
    producer.push(audio);
    drop(producer);

    let packet = tokio::time::timeout(Duration::from_secs(1), audio_only.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet.codec_id, CodecId::Aac);
    assert!(tokio::time::timeout(Duration::from_secs(1), audio_only.recv())
        .await
        .unwrap()
        .is_none());
}
