use std::io::Write;

use foldhash::HashMap;
use foldhash::HashMapExt;
use log::debug;

use crate::error::SplatError;
use crate::structures::{GaussianCloud, ShBands};

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            let line = &buffer[start..start + pos];
            Some(line.strip_suffix(b"\r").unwrap_or(line))
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, SplatError> {
    hm.get(name)
        .copied()
        .ok_or_else(|| SplatError::ParsePly(format!("Missing required field: {}", name)))
}

/// Lines a header may carry that do not affect the vertex layout.
#[inline]
fn is_ignorable(line: &[u8]) -> bool {
    line.starts_with(b"comment") || line.starts_with(b"obj_info") || line.is_empty()
}

struct VertexReader<'a> {
    vertex: &'a [u8],
}

impl VertexReader<'_> {
    #[inline(always)]
    fn get(&self, field: usize) -> f32 {
        let b = &self.vertex[field * 4..field * 4 + 4];
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

/// Parses a binary little-endian 3DGS PLY file with float properties.
#[inline(never)]
pub fn parse_ply(raw_data: &[u8]) -> Result<GaussianCloud, SplatError> {
    let mut offset = 0;

    let mut header_line = |what: &str| {
        loop {
            match next_line(raw_data, &mut offset) {
                Some(l) if is_ignorable(l) => continue,
                Some(l) => return Ok(l),
                None => return Err(SplatError::ParsePly(format!("Missing {}", what))),
            }
        }
    };

    if header_line("'ply' line")? != b"ply" {
        return Err(SplatError::ParsePly(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }
    if header_line("format line")? != b"format binary_little_endian 1.0" {
        return Err(SplatError::ParsePly(
            "Unsupported .ply format (only binary_little_endian 1.0 is supported)".to_string(),
        ));
    }
    let vertex_line = header_line("'element vertex' line")?;
    let num_str = vertex_line
        .strip_prefix(b"element vertex ")
        .ok_or_else(|| SplatError::ParsePly("Missing 'element vertex' definition".to_string()))?;
    let num_points: usize = std::str::from_utf8(num_str)
        .map_err(|e| SplatError::ParsePly(format!("UTF-8 error: {}", e)))?
        .trim()
        .parse()
        .map_err(|e| SplatError::ParsePly(format!("Parse error: {}", e)))?;

    let mut field_names = Vec::new();
    loop {
        let line = header_line("'end_header'")?;
        if line.starts_with(b"end_header") {
            break;
        }
        let name = line.strip_prefix(b"property float ").ok_or_else(|| {
            SplatError::ParsePly(format!(
                "Unsupported property line: {}",
                String::from_utf8_lossy(line)
            ))
        })?;
        field_names.push(name);
    }
    if num_points == 0 {
        return Ok(GaussianCloud::default());
    }

    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &f_bytes) in field_names.iter().enumerate() {
        let s = std::str::from_utf8(f_bytes)
            .map_err(|e| SplatError::ParsePly(format!("UTF-8 error in field name: {}", e)))?;
        field_map.insert(s.trim(), i);
    }

    let position = [
        idx_of(&field_map, "x")?,
        idx_of(&field_map, "y")?,
        idx_of(&field_map, "z")?,
    ];
    let scale = [
        idx_of(&field_map, "scale_0")?,
        idx_of(&field_map, "scale_1")?,
        idx_of(&field_map, "scale_2")?,
    ];
    let rot = [
        idx_of(&field_map, "rot_0")?,
        idx_of(&field_map, "rot_1")?,
        idx_of(&field_map, "rot_2")?,
        idx_of(&field_map, "rot_3")?,
    ];
    let opacity = idx_of(&field_map, "opacity")?;
    let color = [
        idx_of(&field_map, "f_dc_0")?,
        idx_of(&field_map, "f_dc_1")?,
        idx_of(&field_map, "f_dc_2")?,
    ];

    let sh_idx: Vec<usize> = (0..45)
        .map_while(|i| field_map.get(format!("f_rest_{}", i).as_str()).copied())
        .collect();
    if sh_idx.len() % 3 != 0 {
        return Err(SplatError::ParsePly(
            "Incomplete spherical harmonics fields".to_string(),
        ));
    }
    let file_dim = sh_idx.len() / 3;
    let sh_bands = ShBands::from_coeff_count(file_dim);
    let sh_dim = sh_bands.coeff_count();
    if sh_dim != file_dim {
        debug!(
            "{} SH coefficients per channel, keeping the first {}",
            file_dim, sh_dim
        );
    }

    let stride = field_names.len() * 4;
    let expected_bytes = num_points
        .checked_mul(stride)
        .ok_or_else(|| SplatError::ParsePly("Overflow in byte calculation".to_string()))?;
    if raw_data.len() < offset + expected_bytes {
        return Err(SplatError::ParsePly(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            raw_data.len() - offset
        )));
    }

    let mut cloud = GaussianCloud {
        num_points,
        sh_bands,
        positions: Vec::with_capacity(num_points * 3),
        scales: Vec::with_capacity(num_points * 3),
        rotations: Vec::with_capacity(num_points * 4),
        alphas: Vec::with_capacity(num_points),
        colors: Vec::with_capacity(num_points * 3),
        sh: Vec::with_capacity(num_points * sh_dim * 3),
    };

    // f_rest is channel-major in the file, interleaved per coefficient in memory
    let sh_indices: Vec<[usize; 3]> = (0..sh_dim)
        .map(|j| [sh_idx[j], sh_idx[j + file_dim], sh_idx[j + 2 * file_dim]])
        .collect();

    for vertex in raw_data[offset..offset + expected_bytes].chunks_exact(stride) {
        let v = VertexReader { vertex };
        cloud.positions.extend(position.map(|i| v.get(i)));
        cloud.scales.extend(scale.map(|i| v.get(i)));
        let [w, x, y, z] = rot.map(|i| v.get(i));
        cloud.rotations.extend_from_slice(&[x, y, z, w]);
        cloud.alphas.push(v.get(opacity));
        cloud.colors.extend(color.map(|i| v.get(i)));
        for idx in &sh_indices {
            cloud.sh.extend(idx.map(|i| v.get(i)));
        }
    }

    debug!(
        "parsed {} splats with {} SH bands",
        num_points,
        sh_bands.as_u8()
    );
    Ok(cloud)
}

/// Writes `cloud` as a binary little-endian 3DGS PLY file.
pub fn write_ply(
    output: &mut Vec<u8>,
    cloud: &GaussianCloud,
    include_normals: bool,
) -> Result<(), SplatError> {
    let num_points = cloud.num_points;
    let sh_dim = cloud.sh_bands.coeff_count();

    output.clear();
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    writeln!(output, "element vertex {}", num_points)?;
    output.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
    if include_normals {
        output.extend_from_slice(b"property float nx\nproperty float ny\nproperty float nz\n");
    }
    output.extend_from_slice(
        b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n",
    );
    for i in 0..(sh_dim * 3) {
        writeln!(output, "property float f_rest_{}", i)?;
    }
    output.extend_from_slice(
        b"property float opacity\n\
          property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
          property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
          end_header\n",
    );

    let point_size = (3 + if include_normals { 3 } else { 0 } + 3 + (sh_dim * 3) + 1 + 3 + 4) * 4;
    output.reserve(num_points * point_size);

    let mut row: Vec<f32> = Vec::with_capacity(point_size / 4);
    for i in 0..num_points {
        row.clear();
        row.extend_from_slice(&cloud.positions[i * 3..i * 3 + 3]);
        if include_normals {
            row.extend_from_slice(&[0.0; 3]);
        }
        row.extend_from_slice(&cloud.colors[i * 3..i * 3 + 3]);
        for channel in 0..3 {
            row.extend((0..sh_dim).map(|j| cloud.sh[(i * sh_dim + j) * 3 + channel]));
        }
        row.push(cloud.alphas[i]);
        row.extend_from_slice(&cloud.scales[i * 3..i * 3 + 3]);
        let r = &cloud.rotations[i * 4..i * 4 + 4];
        row.extend_from_slice(&[r[3], r[0], r[1], r[2]]);

        output.extend_from_slice(bytemuck::cast_slice(row.as_slice()));
    }
    Ok(())
}
