//! Minimal fragmented-MP4 writer: an init segment (`ftyp` + `moov`) per
//! stream and one `moof` + `mdat` pair per media segment, which is all
//! DASH and CMAF delivery needs.

pub mod boxes;

use {
    crate::codec::avc::AvcDecoderConfigurationRecord,
    crate::media::{MediaTrack, MediaType},
    self::boxes::BoxWriter,
    bytes::{BufMut, Bytes, BytesMut},
};

/// 90 kHz for video tracks, sample rate for audio.
#[must_use]
pub fn track_timescale(track: &MediaTrack) -> u32 {
    match track.media_type {
        MediaType::Video => 90000,
        MediaType::Audio => track.sample_rate.max(1),
    }
}

/// One sample (access unit) inside a fragment.
#[derive(Debug, Clone)]
pub struct FragmentSample {
    pub duration: u32,
    pub data: Bytes,
    pub keyframe: bool,
    /// `pts - dts` in track timescale ticks.
    pub cts_offset: i32,
}

/// Build the stream's init segment for one track.
#[must_use]
pub fn build_init_segment(track: &MediaTrack, track_id: u32) -> Bytes {
    let timescale = track_timescale(track);

    let mut ftyp = BoxWriter::new("ftyp");
    ftyp.put_slice(b"iso6");
    ftyp.put_u32(0x200);
    ftyp.put_slice(b"iso6");
    ftyp.put_slice(b"cmfc");

    let mut moov = BoxWriter::new("moov");
    moov.put_child(build_mvhd(timescale));
    moov.put_child(build_trak(track, track_id, timescale));
    moov.put_child(build_mvex(track_id));

    let mut out = BytesMut::new();
    out.put_slice(&ftyp.finish());
    out.put_slice(&moov.finish());
    out.freeze()
}

/// Build one media segment (`styp` + `moof` + `mdat`).
#[must_use]
pub fn build_media_segment(
    track_id: u32,
    sequence_number: u32,
    base_decode_time: u64,
    samples: &[FragmentSample],
) -> Bytes {
    let mut styp = BoxWriter::new("styp");
    styp.put_slice(b"msdh");
    styp.put_u32(0);
    styp.put_slice(b"msdh");
    styp.put_slice(b"msix");

    let data_len: usize = samples.iter().map(|s| s.data.len()).sum();

    // The trun data offset points past moof into mdat's payload; build the
    // moof once with a placeholder to learn its size, then rebuild.
    let moof_probe = build_moof(track_id, sequence_number, base_decode_time, samples, 0);
    let data_offset = moof_probe.len() as i32 + 8;
    let moof = build_moof(
        track_id,
        sequence_number,
        base_decode_time,
        samples,
        data_offset,
    );

    let mut mdat = BoxWriter::new("mdat");
    for sample in samples {
        mdat.put_slice(&sample.data);
    }

    let mut out = BytesMut::with_capacity(moof.len() + data_len + 64);
    out.put_slice(&styp.finish());
    out.put_slice(&moof);
    out.put_slice(&mdat.finish());
    out.freeze()
}

fn build_moof(
    track_id: u32,
    sequence_number: u32,
    base_decode_time: u64,
    samples: &[FragmentSample],
    data_offset: i32,
) -> Bytes {
    let mut mfhd = BoxWriter::full("mfhd", 0, 0);
    mfhd.put_u32(sequence_number);

    let mut tfhd = BoxWriter::full("tfhd", 0, 0x020000); // default-base-is-moof
    tfhd.put_u32(track_id);

    let mut tfdt = BoxWriter::full("tfdt", 1, 0);
    tfdt.put_u64(base_decode_time);

    // flags: data-offset | sample-duration | sample-size | sample-flags | cts
    let mut trun = BoxWriter::full("trun", 1, 0x000F01);
    trun.put_u32(samples.len() as u32);
    trun.put_i32(data_offset);
    for sample in samples {
        trun.put_u32(sample.duration);
        trun.put_u32(sample.data.len() as u32);
        // sample_depends_on=2 for sync samples, else 1 + non-sync flag.
        trun.put_u32(if sample.keyframe { 0x0200_0000 } else { 0x0101_0000 });
        trun.put_i32(sample.cts_offset);
    }

    let mut traf = BoxWriter::new("traf");
    traf.put_child(tfhd.finish());
    traf.put_child(tfdt.finish());
    traf.put_child(trun.finish());

    let mut moof = BoxWriter::new("moof");
    moof.put_child(mfhd.finish());
    moof.put_child(traf.finish());
    moof.finish()
}

fn build_mvhd(timescale: u32) -> Bytes {
    let mut mvhd = BoxWriter::full("mvhd", 0, 0);
    mvhd.put_u32(0); // creation
    mvhd.put_u32(0); // modification
    mvhd.put_u32(timescale);
    mvhd.put_u32(0); // duration (live: unknown)
    mvhd.put_u32(0x0001_0000); // rate 1.0
    mvhd.put_u16(0x0100); // volume 1.0
    mvhd.put_u16(0);
    mvhd.put_u64(0);
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        mvhd.put_u32(value);
    }
    for _ in 0..6 {
        mvhd.put_u32(0);
    }
    mvhd.put_u32(0xFFFF_FFFF); // next_track_ID
    mvhd.finish()
}

fn build_mvex(track_id: u32) -> Bytes {
    let mut trex = BoxWriter::full("trex", 0, 0);
    trex.put_u32(track_id);
    trex.put_u32(1); // default sample description index
    trex.put_u32(0);
    trex.put_u32(0);
    trex.put_u32(0);

    let mut mvex = BoxWriter::new("mvex");
    mvex.put_child(trex.finish());
    mvex.finish()
}

fn build_trak(track: &MediaTrack, track_id: u32, timescale: u32) -> Bytes {
    let mut tkhd = BoxWriter::full("tkhd", 0, 7); // enabled | in movie | in preview
    tkhd.put_u32(0);
    tkhd.put_u32(0);
    tkhd.put_u32(track_id);
    tkhd.put_u32(0);
    tkhd.put_u32(0); // duration
    tkhd.put_u64(0);
    tkhd.put_u16(0); // layer
    tkhd.put_u16(0); // alternate group
    tkhd.put_u16(if track.media_type == MediaType::Audio { 0x0100 } else { 0 });
    tkhd.put_u16(0);
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        tkhd.put_u32(value);
    }
    tkhd.put_u32(track.width << 16);
    tkhd.put_u32(track.height << 16);

    let mut mdhd = BoxWriter::full("mdhd", 0, 0);
    mdhd.put_u32(0);
    mdhd.put_u32(0);
    mdhd.put_u32(timescale);
    mdhd.put_u32(0);
    mdhd.put_u16(0x55C4); // "und"
    mdhd.put_u16(0);

    let mut hdlr = BoxWriter::full("hdlr", 0, 0);
    hdlr.put_u32(0);
    hdlr.put_slice(if track.media_type == MediaType::Video {
        b"vide"
    } else {
        b"soun"
    });
    hdlr.put_u32(0);
    hdlr.put_u32(0);
    hdlr.put_u32(0);
    hdlr.put_slice(b"freshet\0");

    let mut stbl = BoxWriter::new("stbl");
    stbl.put_child(build_stsd(track));
    for name in ["stts", "stsc", "stco"] {
        let mut empty = BoxWriter::full(name, 0, 0);
        empty.put_u32(0); // entry count
        stbl.put_child(empty.finish());
    }
    let mut stsz = BoxWriter::full("stsz", 0, 0);
    stsz.put_u32(0); // uniform size
    stsz.put_u32(0); // sample count
    stbl.put_child(stsz.finish());

    let mut minf = BoxWriter::new("minf");
    if track.media_type == MediaType::Video {
        let mut vmhd = BoxWriter::full("vmhd", 0, 1);
        vmhd.put_u64(0);
        minf.put_child(vmhd.finish());
    } else {
        let mut smhd = BoxWriter::full("smhd", 0, 0);
        smhd.put_u32(0);
        minf.put_child(smhd.finish());
    }
    let mut dref = BoxWriter::full("dref", 0, 0);
    dref.put_u32(1);
    let url_box = BoxWriter::full("url ", 0, 1); // self-contained
    dref.put_child(url_box.finish());
    let mut dinf = BoxWriter::new("dinf");
    dinf.put_child(dref.finish());
    minf.put_child(dinf.finish());
    minf.put_child(stbl.finish());

    let mut mdia = BoxWriter::new("mdia");
    mdia.put_child(mdhd.finish());
    mdia.put_child(hdlr.finish());
    mdia.put_child(minf.finish());

    let mut trak = BoxWriter::new("trak");
    trak.put_child(tkhd.finish());
    trak.put_child(mdia.finish());
    trak.finish()
}

fn build_stsd(track: &MediaTrack) -> Bytes {
    let mut stsd = BoxWriter::full("stsd", 0, 0);
    stsd.put_u32(1);

    match track.media_type {
        MediaType::Video => {
            let mut avc1 = BoxWriter::new("avc1");
            avc1.put_u32(0);
            avc1.put_u16(0);
            avc1.put_u16(1); // data reference index
            avc1.put_u64(0);
            avc1.put_u64(0);
            avc1.put_u16(track.width as u16);
            avc1.put_u16(track.height as u16);
            avc1.put_u32(0x0048_0000); // 72 dpi
            avc1.put_u32(0x0048_0000);
            avc1.put_u32(0);
            avc1.put_u16(1); // frame count
            for _ in 0..8 {
                avc1.put_u32(0); // compressor name
            }
            avc1.put_u16(0x0018); // depth
            avc1.put_u16(0xFFFF); // pre-defined

            let mut avcc = BoxWriter::new("avcC");
            if let Some(extradata) = &track.extradata {
                // Extradata is already an AVCDecoderConfigurationRecord.
                if AvcDecoderConfigurationRecord::parse(extradata).is_ok() {
                    avcc.put_slice(extradata);
                }
            }
            avc1.put_child(avcc.finish());
            stsd.put_child(avc1.finish());
        }
        MediaType::Audio => {
            let mut mp4a = BoxWriter::new("mp4a");
            mp4a.put_u32(0);
            mp4a.put_u16(0);
            mp4a.put_u16(1); // data reference index
            mp4a.put_u64(0);
            mp4a.put_u16(u16::from(track.channel_layout.count()));
            mp4a.put_u16(16); // sample size
            mp4a.put_u32(0);
            mp4a.put_u32(track.sample_rate << 16);

            mp4a.put_child(build_esds(track));
            stsd.put_child(mp4a.finish());
        }
    }

    stsd.finish()
}

fn build_esds(track: &MediaTrack) -> Bytes {
    let config = track
        .extradata
        .as_ref()
        .map(|b| b.to_vec())
        .unwrap_or_default();

    // DecoderSpecificInfo <- DecoderConfig <- ES descriptor.
    let dsi_len = config.len();
    let dcd_len = 13 + 2 + dsi_len;
    let es_len = 3 + 2 + dcd_len + 3;

    let mut esds = BoxWriter::full("esds", 0, 0);
    esds.put_u8(0x03); // ES_DescrTag
    esds.put_u8(es_len as u8);
    esds.put_u16(0); // ES_ID
    esds.put_u8(0); // flags

    esds.put_u8(0x04); // DecoderConfigDescrTag
    esds.put_u8(dcd_len as u8);
    esds.put_u8(0x40); // AAC
    esds.put_u8(0x15); // audio stream
    esds.put_u8(0); // buffer size (24 bits)
    esds.put_u16(0);
    esds.put_u32(track.bitrate as u32); // max bitrate
    esds.put_u32(track.bitrate as u32); // avg bitrate

    esds.put_u8(0x05); // DecoderSpecificInfoTag
    esds.put_u8(dsi_len as u8);
    esds.put_slice(&config);

    esds.put_u8(0x06); // SLConfigDescrTag
    esds.put_u8(1);
    esds.put_u8(0x02);
    esds.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecId, MediaTrack, Timebase};

    fn box_name(data: &[u8], offset: usize) -> &[u8] {
        &data[offset + 4..offset + 8]
    }

    fn box_size(data: &[u8], offset: usize) -> usize {
        u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize
    }

    #[test]
    fn test_init_segment_box_layout() {
        let mut track = MediaTrack::video(1, CodecId::H264, Timebase::new(1, 90000));
        track.width = 1280;
        track.height = 720;
        let init = build_init_segment(&track, 1);

        assert_eq!(box_name(&init, 0), b"ftyp");
        let ftyp_size = box_size(&init, 0);
        assert_eq!(box_name(&init, ftyp_size), b"moov");
        assert_eq!(ftyp_size + box_size(&init, ftyp_size), init.len());
    }

    #[test]
    fn test_media_segment_trun_offset_lands_on_mdat_payload() {
        let samples = vec![
            FragmentSample {
                duration: 3000,
                data: Bytes::from_static(b"AAAA"),
                keyframe: true,
                cts_offset: 0,
            },
            FragmentSample {
                duration: 3000,
                data: Bytes::from_static(b"BB"),
                keyframe: false,
                cts_offset: 0,
            },
        ];
        let segment = build_media_segment(1, 7, 90000, &samples);

        assert_eq!(box_name(&segment, 0), b"styp");
        let styp_size = box_size(&segment, 0);
        assert_eq!(box_name(&segment, styp_size), b"moof");
        let moof_size = box_size(&segment, styp_size);
        let mdat_offset = styp_size + moof_size;
        assert_eq!(box_name(&segment, mdat_offset), b"mdat");
        assert_eq!(&segment[mdat_offset + 8..mdat_offset + 12], b"AAAA");
        assert_eq!(segment.len(), mdat_offset + 8 + 6);
    }
}
