//! Graph format converter.
//!
//! Turns an edge list (in memory or a text file) into the engine's on-disk
//! layout: a compact index file plus `k` adjacency files striped by page.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{CACHE_LINE, EDGE_WIDTH, PAGE_SIZE, READ_BUFFER_SIZE};
use crate::types::{GraphHeader, Vid};
use crate::util::align_up;

/// An in-memory adjacency-list graph used as the conversion staging area.
///
/// # Fields
/// * `num_nodes` - Number of vertices; ids are `0..num_nodes`
/// * `adj` - Out-neighbour list per vertex, in insertion order
pub struct GraphData {
    pub num_nodes: usize,
    pub adj: Vec<Vec<Vid>>,
}

impl GraphData {
    /// Builds a graph over `num_nodes` vertices from a directed edge list.
    ///
    /// # Arguments
    /// * `num_nodes` - Vertex count; every edge endpoint must be below it
    /// * `edges` - Directed `(src, dst)` pairs
    ///
    /// # Returns
    /// The adjacency-list staging graph.
    ///
    /// # Panics
    /// * If any edge endpoint is out of range
    pub fn from_edges(num_nodes: usize, edges: &[(Vid, Vid)]) -> Self {
        let mut adj = vec![Vec::new(); num_nodes];
        for &(src, dst) in edges {
            assert!(
                (src as usize) < num_nodes && (dst as usize) < num_nodes,
                "edge ({}, {}) out of range for {} vertices",
                src,
                dst,
                num_nodes
            );
            adj[src as usize].push(dst);
        }
        Self { num_nodes, adj }
    }

    /// Parses a whitespace-separated edge-list text file.
    ///
    /// Lines starting with `#` or `%` are comments. The vertex count is one
    /// past the largest id seen.
    ///
    /// # Arguments
    /// * `path` - The edge-list file, one `src dst` pair per line
    ///
    /// # Returns
    /// The parsed staging graph.
    ///
    /// # Panics
    /// * If the file cannot be opened or a line fails to parse
    pub fn from_edge_list_file(path: &str) -> Self {
        let file = File::open(path)
            .unwrap_or_else(|e| panic!("cannot open edge list {}: {}", path, e));
        let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut edges: Vec<(Vid, Vid)> = Vec::new();
        let mut max_vid: Vid = 0;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} edges {msg}")
                .expect("progress template"),
        );
        pb.set_message("Edge list loading.");

        for line in reader.lines() {
            let line = line.unwrap_or_else(|e| panic!("read error on {}: {}", path, e));
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('%') {
                continue;
            }
            let mut tokens = trimmed.split_whitespace();
            let src = tokens
                .next()
                .and_then(|t| t.parse::<Vid>().ok())
                .expect("Edge list format error.");
            let dst = tokens
                .next()
                .and_then(|t| t.parse::<Vid>().ok())
                .expect("Edge list format error.");
            max_vid = max_vid.max(src).max(dst);
            edges.push((src, dst));
            pb.inc(1);
        }
        pb.finish_and_clear();

        let num_nodes = if edges.is_empty() { 0 } else { max_vid as usize + 1 };
        Self::from_edges(num_nodes, &edges)
    }

    pub fn num_edges(&self) -> u64 {
        self.adj.iter().map(|n| n.len() as u64).sum()
    }

    pub fn degree(&self, v: Vid) -> u32 {
        self.adj[v as usize].len() as u32
    }

    /// The same graph with every edge reversed. Algorithms that walk
    /// incoming edges run over the transposed store.
    ///
    /// # Returns
    /// A new staging graph with `(dst, src)` for every stored `(src, dst)`.
    pub fn transpose(&self) -> Self {
        let mut adj = vec![Vec::new(); self.num_nodes];
        for (src, neighbors) in self.adj.iter().enumerate() {
            for &dst in neighbors {
                adj[dst as usize].push(src as Vid);
            }
        }
        Self {
            num_nodes: self.num_nodes,
            adj,
        }
    }

    /// Writes the compact index file: header, one u64 base offset per 16
    /// vertices, cache-line padding, then u32 degrees.
    ///
    /// # Arguments
    /// * `path` - Destination of the index file
    ///
    /// # Panics
    /// * If the file cannot be created or written
    pub fn write_index_file(&self, path: &Path) {
        let file = File::create(path)
            .unwrap_or_else(|e| panic!("cannot create index {}: {}", path.display(), e));
        let mut writer = BufWriter::new(file);

        let header = GraphHeader::new(self.num_nodes as u64, self.num_edges());
        writer
            .write_all(&header.encode())
            .unwrap_or_else(|e| panic!("index write failed: {}", e));

        // Base offsets, one per group of 16 vertices.
        let num_offsets = crate::types::num_base_offsets(self.num_nodes as u64);
        let mut offset: u64 = 0;
        let mut written = GraphHeader::BYTES;
        for group in 0..num_offsets {
            writer
                .write_all(&offset.to_le_bytes())
                .unwrap_or_else(|e| panic!("index write failed: {}", e));
            written += 8;
            let beg = group * 16;
            let end = (beg + 16).min(self.num_nodes);
            for v in beg..end {
                offset += self.adj[v].len() as u64;
            }
        }

        // Pad to the cache line before the degree array.
        let padded = align_up(written, CACHE_LINE);
        writer
            .write_all(&vec![0u8; padded - written])
            .unwrap_or_else(|e| panic!("index write failed: {}", e));

        for neighbors in &self.adj {
            writer
                .write_all(&(neighbors.len() as u32).to_le_bytes())
                .unwrap_or_else(|e| panic!("index write failed: {}", e));
        }

        writer
            .flush()
            .unwrap_or_else(|e| panic!("index flush failed: {}", e));
    }

    /// Writes the adjacency files, striping the packed edge stream across
    /// the given paths page by page. Each file is padded to a whole number
    /// of pages.
    ///
    /// # Arguments
    /// * `paths` - One output file per storage device, in stripe order
    ///
    /// # Panics
    /// * If any file cannot be created or written
    pub fn write_adj_files(&self, paths: &[std::path::PathBuf]) {
        let num_devices = paths.len();
        assert!(num_devices > 0, "at least one adjacency file required");

        let mut writers: Vec<BufWriter<File>> = paths
            .iter()
            .map(|p| {
                let file = File::create(p)
                    .unwrap_or_else(|e| panic!("cannot create adj file {}: {}", p.display(), e));
                BufWriter::new(file)
            })
            .collect();

        // Pack all edges into one contiguous byte stream, then cut it into
        // pages dealt round-robin to the devices.
        let mut page = vec![0u8; PAGE_SIZE];
        let mut page_fill = 0usize;
        let mut page_cnt = 0usize;

        let mut flush_page = |page: &mut Vec<u8>, fill: &mut usize, cnt: &mut usize| {
            // Tail of the last page stays zeroed.
            page[*fill..].fill(0);
            let device = *cnt % num_devices;
            writers[device]
                .write_all(page)
                .unwrap_or_else(|e| panic!("adj write failed: {}", e));
            *fill = 0;
            *cnt += 1;
        };

        for neighbors in &self.adj {
            for &dst in neighbors {
                page[page_fill..page_fill + EDGE_WIDTH].copy_from_slice(&dst.to_le_bytes());
                page_fill += EDGE_WIDTH;
                if page_fill == PAGE_SIZE {
                    flush_page(&mut page, &mut page_fill, &mut page_cnt);
                }
            }
        }
        if page_fill > 0 {
            flush_page(&mut page, &mut page_fill, &mut page_cnt);
        }

        for (writer, path) in writers.iter_mut().zip(paths) {
            writer
                .flush()
                .unwrap_or_else(|e| panic!("adj flush failed for {}: {}", path.display(), e));
        }
    }

    /// Convenience wrapper writing both the index and the adjacency files.
    pub fn write_files(&self, index_path: &Path, adj_paths: &[std::path::PathBuf]) {
        self.write_index_file(index_path);
        self.write_adj_files(adj_paths);
    }
}

/// Derives the default adjacency file names for `base` striped over
/// `num_devices` devices.
///
/// # Arguments
/// * `base` - Common path prefix of the graph's files
/// * `num_devices` - Number of stripe targets
///
/// # Returns
/// One path per device, in stripe order.
pub fn adj_file_names(base: &str, num_devices: usize) -> Vec<std::path::PathBuf> {
    (0..num_devices)
        .map(|i| std::path::PathBuf::from(format!("{}.adj.{}.{}", base, num_devices, i)))
        .collect()
}

/// Derives the default index file name for `base`.
pub fn index_file_name(base: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{}.index", base))
}

#[cfg(test)]
mod test_convert {
    use super::*;
    use crate::types::{degrees_offset, GraphHeader};
    use std::fs;

    fn diamond() -> GraphData {
        GraphData::from_edges(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)])
    }

    #[test]
    fn test_index_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index_path = dir.path().join("g.index");
        diamond().write_index_file(&index_path);

        let bytes = fs::read(&index_path).expect("read index");
        let header = GraphHeader::decode(&bytes).expect("header");
        assert_eq!(header.num_nodes, 5);
        assert_eq!(header.num_edges, 5);
        assert_eq!(header.size_of_edge, EDGE_WIDTH as u64);

        // One base offset of zero, then degrees [2, 1, 1, 1, 0] at the
        // cache-line boundary.
        let deg_off = degrees_offset(5);
        let degree = |v: usize| {
            u32::from_le_bytes(bytes[deg_off + 4 * v..deg_off + 4 * v + 4].try_into().unwrap())
        };
        assert_eq!(
            (0..5).map(degree).collect::<Vec<_>>(),
            vec![2, 1, 1, 1, 0]
        );
    }

    #[test]
    fn test_adj_striping_and_padding() {
        let dir = tempfile::tempdir().expect("tempdir");
        // 3000 edges from a single vertex cover 12000 bytes: two pages on
        // device 0 and one on device 1.
        let edges: Vec<(Vid, Vid)> = (0..3000).map(|i| (0, (i % 7) as Vid)).collect();
        let graph = GraphData::from_edges(8, &edges);
        let paths = vec![dir.path().join("g.adj.2.0"), dir.path().join("g.adj.2.1")];
        graph.write_adj_files(&paths);

        let len0 = fs::metadata(&paths[0]).expect("metadata").len();
        let len1 = fs::metadata(&paths[1]).expect("metadata").len();
        assert_eq!(len0, 2 * PAGE_SIZE as u64);
        assert_eq!(len1, PAGE_SIZE as u64);

        // The first destination of page 1 (on device 1) continues the edge
        // stream: edge index 1024.
        let dev1 = fs::read(&paths[1]).expect("read adj");
        let first = u32::from_le_bytes(dev1[0..4].try_into().unwrap());
        assert_eq!(first, (1024 % 7) as u32);
    }

    #[test]
    fn test_transpose() {
        let graph = diamond();
        let rev = graph.transpose();
        assert_eq!(rev.adj[3], vec![1, 2]);
        assert_eq!(rev.adj[0], Vec::<Vid>::new());
        assert_eq!(rev.num_edges(), graph.num_edges());
    }

    #[test]
    fn test_edge_list_parsing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edges.txt");
        fs::write(&path, "# comment\n0 1\n0 2\n2 3\n").expect("write edges");
        let graph = GraphData::from_edge_list_file(path.to_str().expect("utf8 path"));
        assert_eq!(graph.num_nodes, 4);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.adj[0], vec![1, 2]);
    }
}
