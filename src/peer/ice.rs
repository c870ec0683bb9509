use crate::peer::types::IceCandidate;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Тип кандидата по полю `typ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

/// Проверка кандидата перед применением.
/// Пустая строка у браузеров означает end-of-candidates и не применяется.
pub fn is_well_formed(candidate: &IceCandidate) -> bool {
    let line = candidate
        .candidate
        .strip_prefix("a=")
        .unwrap_or(&candidate.candidate);
    if !line.starts_with("candidate:") {
        return false;
    }
    // поля: foundation component transport priority address port "typ" type
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.len() >= 8 && fields[6] == "typ"
}

/// Убирает SDP-префикс `a=`: движок принимает только `candidate:...`
pub fn normalize(mut candidate: IceCandidate) -> IceCandidate {
    if let Some(line) = candidate.candidate.strip_prefix("a=") {
        candidate.candidate = line.to_owned();
    }
    candidate
}

pub fn candidate_type(candidate: &IceCandidate) -> Option<CandidateType> {
    let mut fields = candidate.candidate.split_whitespace();
    fields.find(|f| *f == "typ")?;
    match fields.next()? {
        "host" => Some(CandidateType::Host),
        "srflx" => Some(CandidateType::ServerReflexive),
        "prflx" => Some(CandidateType::PeerReflexive),
        "relay" => Some(CandidateType::Relay),
        _ => None,
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

/// Считает типы собранных кандидатов.
/// Предупреждает, если есть только host: через NAT такое соединение не пройдёт.
pub fn analyze_candidates(candidates: &[IceCandidate]) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate_type(candidate) {
            Some(CandidateType::Host) => host_count += 1,
            Some(CandidateType::ServerReflexive) | Some(CandidateType::PeerReflexive) => {
                srflx_count += 1
            }
            Some(CandidateType::Relay) => relay_count += 1,
            None => {}
        }
    }

    debug!(
        host = host_count,
        srflx = srflx_count,
        relay = relay_count,
        "candidate analysis"
    );

    if host_count > 0 && srflx_count == 0 && relay_count == 0 {
        warn!("only host candidates gathered, check STUN/TURN reachability");
    }
    (host_count, srflx_count, relay_count)
}
