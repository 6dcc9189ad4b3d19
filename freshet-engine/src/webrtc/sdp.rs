use {
    super::errors::{RtcError, RtcErrorValue},
    std::fmt::Write as _,
};

/// Media payload description: one `a=rtpmap` plus its `fmtp` and
/// `rtcp-fb` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadAttr {
    pub id: u8,
    pub codec: String,
    pub rate: u32,
    pub channels: Option<u32>,
    pub fmtp: Option<String>,
    pub rtcp_fb: Vec<String>,
}

impl PayloadAttr {
    #[must_use]
    pub fn new(id: u8, codec: impl Into<String>, rate: u32) -> Self {
        Self {
            id,
            codec: codec.into(),
            rate,
            channels: None,
            fmtp: None,
            rtcp_fb: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpMediaType {
    Video,
    Audio,
}

impl SdpMediaType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: SdpMediaType,
    pub payloads: Vec<PayloadAttr>,
    pub mid: String,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub setup: String,
    pub direction: String,
    pub rtcp_mux: bool,
    pub ssrc: u32,
    pub cname: String,
    /// Raw `a=candidate:` lines and anything else carried verbatim.
    pub extra_attributes: Vec<String>,
}

impl MediaDescription {
    #[must_use]
    pub fn new(media_type: SdpMediaType, mid: String, ssrc: u32, cname: String) -> Self {
        Self {
            media_type,
            payloads: Vec::new(),
            mid,
            ice_ufrag: String::new(),
            ice_pwd: String::new(),
            setup: "actpass".to_string(),
            direction: "sendonly".to_string(),
            rtcp_mux: true,
            ssrc,
            cname,
            extra_attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn payload(&self, id: u8) -> Option<&PayloadAttr> {
        self.payloads.iter().find(|payload| payload.id == id)
    }
}

/// The session description this server offers (and re-parses from
/// answers). Serialization is canonical: serializing a parsed document
/// reproduces it byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin_username: String,
    pub session_id: u32,
    pub session_version: u32,
    pub origin_address: String,
    pub session_name: String,
    pub fingerprint_algorithm: String,
    pub fingerprint_value: String,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    #[must_use]
    pub fn new(origin_username: impl Into<String>, session_id: u32) -> Self {
        Self {
            origin_username: origin_username.into(),
            session_id,
            session_version: 2,
            origin_address: "127.0.0.1".to_string(),
            session_name: "-".to_string(),
            fingerprint_algorithm: "sha-256".to_string(),
            fingerprint_value: String::new(),
            media: Vec::new(),
        }
    }

    #[must_use]
    pub fn marshal(&self) -> String {
        let mut sdp = String::new();
        let _ = write!(
            sdp,
            "v=0\r\no={} {} {} IN IP4 {}\r\ns={}\r\nt=0 0\r\na=ice-options:trickle\r\na=fingerprint:{} {}\r\na=msid-semantic:WMS *\r\n",
            self.origin_username,
            self.session_id,
            self.session_version,
            self.origin_address,
            self.session_name,
            self.fingerprint_algorithm,
            self.fingerprint_value,
        );

        let mids: Vec<&str> = self.media.iter().map(|m| m.mid.as_str()).collect();
        let _ = write!(sdp, "a=group:BUNDLE {}\r\n", mids.join(" "));

        for media in &self.media {
            let ids: Vec<String> = media
                .payloads
                .iter()
                .map(|payload| payload.id.to_string())
                .collect();
            let _ = write!(
                sdp,
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\nc=IN IP4 0.0.0.0\r\na=ice-ufrag:{}\r\na=ice-pwd:{}\r\na=setup:{}\r\na=mid:{}\r\na={}\r\n",
                media.media_type.as_str(),
                ids.join(" "),
                media.ice_ufrag,
                media.ice_pwd,
                media.setup,
                media.mid,
                media.direction,
            );
            if media.rtcp_mux {
                sdp.push_str("a=rtcp-mux\r\n");
            }
            for payload in &media.payloads {
                match payload.channels {
                    Some(channels) => {
                        let _ = write!(
                            sdp,
                            "a=rtpmap:{} {}/{}/{}\r\n",
                            payload.id, payload.codec, payload.rate, channels
                        );
                    }
                    None => {
                        let _ = write!(
                            sdp,
                            "a=rtpmap:{} {}/{}\r\n",
                            payload.id, payload.codec, payload.rate
                        );
                    }
                }
                for feedback in &payload.rtcp_fb {
                    let _ = write!(sdp, "a=rtcp-fb:{} {}\r\n", payload.id, feedback);
                }
                if let Some(fmtp) = &payload.fmtp {
                    let _ = write!(sdp, "a=fmtp:{} {}\r\n", payload.id, fmtp);
                }
            }
            let _ = write!(sdp, "a=ssrc:{} cname:{}\r\n", media.ssrc, media.cname);
            for attribute in &media.extra_attributes {
                let _ = write!(sdp, "a={attribute}\r\n");
            }
        }
        sdp
    }

    pub fn unmarshal(text: &str) -> Result<Self, RtcError> {
        let mut session = Self::new("-", 0);
        session.session_version = 0;
        session.origin_address.clear();
        session.fingerprint_algorithm.clear();
        session.session_name.clear();

        let mut current: Option<MediaDescription> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (kind, value) = line
                .split_once('=')
                .ok_or_else(|| RtcErrorValue::SdpParse(format!("bad line: {line}")))?;

            match kind {
                "v" | "t" | "c" => {}
                "o" => {
                    let fields: Vec<&str> = value.split(' ').collect();
                    if fields.len() < 6 {
                        return Err(RtcErrorValue::SdpParse("short origin".to_string()).into());
                    }
                    session.origin_username = fields[0].to_string();
                    session.session_id = fields[1].parse().unwrap_or(0);
                    session.session_version = fields[2].parse().unwrap_or(0);
                    session.origin_address = fields[5].to_string();
                }
                "s" => session.session_name = value.to_string(),
                "m" => {
                    if let Some(finished) = current.take() {
                        session.media.push(finished);
                    }
                    let fields: Vec<&str> = value.split(' ').collect();
                    let media_type = match fields.first().copied() {
                        Some("video") => SdpMediaType::Video,
                        Some("audio") => SdpMediaType::Audio,
                        other => {
                            return Err(RtcErrorValue::SdpParse(format!(
                                "unsupported media: {other:?}"
                            ))
                            .into())
                        }
                    };
                    let mut media =
                        MediaDescription::new(media_type, String::new(), 0, String::new());
                    media.rtcp_mux = false;
                    media.setup.clear();
                    media.direction.clear();
                    for id in fields.iter().skip(3) {
                        if let Ok(id) = id.parse::<u8>() {
                            media.payloads.push(PayloadAttr::new(id, "", 0));
                        }
                    }
                    current = Some(media);
                }
                "a" => match &mut current {
                    None => {
                        if let Some(fingerprint) = value.strip_prefix("fingerprint:") {
                            if let Some((algorithm, fp)) = fingerprint.split_once(' ') {
                                session.fingerprint_algorithm = algorithm.to_string();
                                session.fingerprint_value = fp.to_string();
                            }
                        }
                        // ice-options / msid-semantic / group are regenerated.
                    }
                    Some(media) => parse_media_attribute(media, value)?,
                },
                _ => {}
            }
        }
        if let Some(finished) = current.take() {
            session.media.push(finished);
        }

        Ok(session)
    }
}

fn parse_media_attribute(media: &mut MediaDescription, value: &str) -> Result<(), RtcError> {
    if let Some(ufrag) = value.strip_prefix("ice-ufrag:") {
        media.ice_ufrag = ufrag.to_string();
    } else if let Some(pwd) = value.strip_prefix("ice-pwd:") {
        media.ice_pwd = pwd.to_string();
    } else if let Some(setup) = value.strip_prefix("setup:") {
        media.setup = setup.to_string();
    } else if let Some(mid) = value.strip_prefix("mid:") {
        media.mid = mid.to_string();
    } else if value == "rtcp-mux" {
        media.rtcp_mux = true;
    } else if matches!(value, "sendonly" | "recvonly" | "sendrecv" | "inactive") {
        media.direction = value.to_string();
    } else if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
        let (id, spec) = rtpmap
            .split_once(' ')
            .ok_or_else(|| RtcErrorValue::SdpParse(format!("bad rtpmap: {rtpmap}")))?;
        let id: u8 = id
            .parse()
            .map_err(|_| RtcErrorValue::SdpParse(format!("bad payload id: {id}")))?;
        let mut parts = spec.split('/');
        let codec = parts.next().unwrap_or_default().to_string();
        let rate = parts.next().and_then(|r| r.parse().ok()).unwrap_or(0);
        let channels = parts.next().and_then(|c| c.parse().ok());
        if let Some(payload) = media.payloads.iter_mut().find(|p| p.id == id) {
            payload.codec = codec;
            payload.rate = rate;
            payload.channels = channels;
        }
    } else if let Some(feedback) = value.strip_prefix("rtcp-fb:") {
        if let Some((id, kind)) = feedback.split_once(' ') {
            if let Ok(id) = id.parse::<u8>() {
                if let Some(payload) = media.payloads.iter_mut().find(|p| p.id == id) {
                    payload.rtcp_fb.push(kind.to_string());
                }
            }
        }
    } else if let Some(fmtp) = value.strip_prefix("fmtp:") {
        if let Some((id, params)) = fmtp.split_once(' ') {
            if let Ok(id) = id.parse::<u8>() {
                if let Some(payload) = media.payloads.iter_mut().find(|p| p.id == id) {
                    payload.fmtp = Some(params.to_string());
                }
            }
        }
    } else if let Some(ssrc) = value.strip_prefix("ssrc:") {
        if let Some((id, rest)) = ssrc.split_once(' ') {
            media.ssrc = id.parse().unwrap_or(0);
            if let Some(cname) = rest.strip_prefix("cname:") {
                media.cname = cname.to_string();
            }
        }
    } else {
        media.extra_attributes.push(value.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer() -> SessionDescription {
        let mut session = SessionDescription::new("Freshet", 12345);
        session.fingerprint_value =
            "AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99"
                .to_string();

        let mut video = MediaDescription::new(
            SdpMediaType::Video,
            "v0".to_string(),
            0x1234_5678,
            "freshetcname01".to_string(),
        );
        video.ice_ufrag = "ufragAB".to_string();
        video.ice_pwd = "pwd012345678901234567890123456789".to_string();
        let mut h264 = PayloadAttr::new(97, "H264", 90000);
        h264.fmtp = Some(
            "packetization-mode=1;profile-level-id=42e01f;level-asymmetry-allowed=1".to_string(),
        );
        h264.rtcp_fb.push("nack".to_string());
        video.payloads.push(h264);
        video.payloads.push(PayloadAttr::new(123, "red", 90000));
        video.payloads.push(PayloadAttr::new(124, "ulpfec", 90000));
        video
            .extra_attributes
            .push("candidate:0 1 UDP 50 192.168.0.1 10000 typ host".to_string());
        session.media.push(video);

        let mut audio = MediaDescription::new(
            SdpMediaType::Audio,
            "a0".to_string(),
            0x8765_4321,
            "freshetcname02".to_string(),
        );
        audio.ice_ufrag = "ufragAB".to_string();
        audio.ice_pwd = "pwd012345678901234567890123456789".to_string();
        let mut opus = PayloadAttr::new(111, "OPUS", 48000);
        opus.channels = Some(2);
        opus.fmtp = Some("stereo=1;useinbandfec=1;".to_string());
        audio.payloads.push(opus);
        session.media.push(audio);

        session
    }

    #[test]
    fn test_marshal_unmarshal_is_byte_identical() {
        let offer = sample_offer();
        let text = offer.marshal();
        let parsed = SessionDescription::unmarshal(&text).unwrap();
        assert_eq!(parsed.marshal(), text);
    }

    #[test]
    fn test_parse_recovers_structure() {
        let text = sample_offer().marshal();
        let parsed = SessionDescription::unmarshal(&text).unwrap();

        assert_eq!(parsed.media.len(), 2);
        let video = &parsed.media[0];
        let ids: Vec<u8> = video.payloads.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![97, 123, 124]);
        assert_eq!(video.payloads[1].codec, "red");
        assert!(video.payloads[0]
            .fmtp
            .as_deref()
            .unwrap()
            .contains("packetization-mode=1"));
        assert_eq!(video.payloads[0].rtcp_fb, vec!["nack".to_string()]);
        assert!(video.rtcp_mux);
        assert_eq!(video.direction, "sendonly");
        assert_eq!(video.setup, "actpass");
        assert_eq!(
            video.extra_attributes,
            vec!["candidate:0 1 UDP 50 192.168.0.1 10000 typ host".to_string()]
        );

        let audio = &parsed.media[1];
        assert_eq!(audio.payloads[0].channels, Some(2));
        assert_eq!(audio.payloads[0].fmtp.as_deref(), Some("stereo=1;useinbandfec=1;"));
    }
}
