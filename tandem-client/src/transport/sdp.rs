//! Session description rewriting.

/// Caps the video m-section of `sdp` at `kbps` with `b=AS` and `b=TIAS`
/// lines, replacing any bandwidth lines already present there. Other
/// sections are left untouched. A cap of zero returns the input unchanged.
pub fn cap_video_bitrate(sdp: &str, kbps: u32) -> String {
    if kbps == 0 {
        return sdp.to_owned();
    }

    let bandwidth = [format!("b=AS:{kbps}"), format!("b=TIAS:{}", u64::from(kbps) * 1000)];
    let mut out: Vec<String> = Vec::new();
    let mut in_video = false;
    let mut pending = false;

    for line in sdp.lines() {
        if line.starts_with("m=") {
            if pending {
                out.extend(bandwidth.iter().cloned());
            }
            in_video = line.starts_with("m=video");
            pending = in_video;
            out.push(line.to_owned());
            continue;
        }

        if in_video {
            if line.starts_with("b=") {
                continue;
            }
            // Bandwidth lines belong after the optional i= and c= lines.
            if pending && !line.starts_with("i=") && !line.starts_with("c=") {
                out.extend(bandwidth.iter().cloned());
                pending = false;
            }
        }
        out.push(line.to_owned());
    }

    if pending {
        out.extend(bandwidth.iter().cloned());
    }

    let mut munged = out.join("\r\n");
    munged.push_str("\r\n");
    munged
}
