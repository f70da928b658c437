//! On-disk graph store.
//!
//! A graph lives on disk as one compact index file plus `k` adjacency files
//! striped by page. The store memory-maps the index, owns a read handle per
//! adjacency file, and precomputes the page-to-vertex-range map that lets a
//! worker recover every (src, dst) pair contained in a fetched page.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::config::{EDGE_WIDTH, PAGE_SIZE};
use crate::frontier::bitmap::Bitmap;
use crate::types::{offset_in_page, page_of, GraphHeader, PageId, Vid, VidRange};

pub mod convert;

/// One storage device: an adjacency file and its activation bitmap.
///
/// # Fields
/// * `path` - Location of the adjacency file, kept for diagnostics and for
///   buffered re-opens by the debug reader
/// * `file` - Read handle the I/O worker issues positional reads against
/// * `num_pages` - Number of whole pages in the file
/// * `activated_pages` - Device-local pages already issued or scheduled
///   this round
struct Device {
    path: PathBuf,
    file: File,
    num_pages: u64,
    /// Pages of this device already issued or scheduled this round.
    activated_pages: Bitmap,
}

pub struct DiskGraph {
    index_map: Mmap,
    num_nodes: usize,
    num_edges: u64,
    degrees_offset: usize,
    devices: Vec<Device>,
    total_pages: u64,
    /// For each global page, the lowest and highest vertex whose edges
    /// intersect it.
    p2v_map: Vec<VidRange>,
    non_empty_nodes: Bitmap,
    num_empty_nodes: usize,
}

impl DiskGraph {
    /// Opens and indexes a graph. Called once; the store is immutable and
    /// safe for concurrent readers afterwards.
    ///
    /// Memory-maps the index file, opens every adjacency file, marks the
    /// non-empty vertices, and precomputes the page-to-vertex-range map.
    ///
    /// # Arguments
    /// * `index_path` - The compact index file
    /// * `adj_paths` - One adjacency file per storage device, in stripe
    ///   order
    ///
    /// # Returns
    /// A fully initialized graph store.
    ///
    /// # Panics
    /// * If any file cannot be opened, mapped, or stat'd
    /// * If the header declares an unsupported edge record width
    /// * If an adjacency file is not a whole number of pages
    pub fn build<P: AsRef<Path>, Q: AsRef<Path>>(index_path: P, adj_paths: &[Q]) -> Self {
        assert!(!adj_paths.is_empty(), "at least one adjacency file required");

        let index_path = index_path.as_ref();
        let index_file = File::open(index_path)
            .unwrap_or_else(|e| panic!("cannot open index {}: {}", index_path.display(), e));
        let index_map = unsafe {
            Mmap::map(&index_file)
                .unwrap_or_else(|e| panic!("cannot map index {}: {}", index_path.display(), e))
        };

        let header = GraphHeader::decode(&index_map)
            .unwrap_or_else(|| panic!("index {} too short for header", index_path.display()));
        assert_eq!(
            header.size_of_edge as usize, EDGE_WIDTH,
            "unsupported edge record width {} in {}",
            header.size_of_edge,
            index_path.display()
        );

        let num_nodes = header.num_nodes as usize;
        let num_edges = header.num_edges;
        let degrees_offset = crate::types::degrees_offset(header.num_nodes);

        let devices: Vec<Device> = adj_paths
            .iter()
            .map(|p| {
                let path = p.as_ref().to_path_buf();
                let file = open_adjacency_file(&path);
                let len = fs::metadata(&path)
                    .unwrap_or_else(|e| panic!("cannot stat {}: {}", path.display(), e))
                    .len();
                assert!(
                    len % PAGE_SIZE as u64 == 0,
                    "adjacency file {} is not page aligned ({} bytes)",
                    path.display(),
                    len
                );
                let num_pages = len / PAGE_SIZE as u64;
                Device {
                    path,
                    file,
                    num_pages,
                    activated_pages: Bitmap::new(num_pages as usize),
                }
            })
            .collect();
        let total_pages: u64 = devices.iter().map(|d| d.num_pages).sum();

        let mut graph = Self {
            index_map,
            num_nodes,
            num_edges,
            degrees_offset,
            devices,
            total_pages,
            p2v_map: Vec::new(),
            non_empty_nodes: Bitmap::new(num_nodes),
            num_empty_nodes: 0,
        };

        graph.init_vertices();
        graph.init_page_to_vertex_map();
        graph.print();
        graph
    }

    /// Scans the degree array once, populating the non-empty-vertex bitmap
    /// and the empty-vertex count.
    fn init_vertices(&mut self) {
        for v in 0..self.num_nodes {
            if self.degree(v as Vid) > 0 {
                self.non_empty_nodes.set_bit(v);
            } else {
                self.num_empty_nodes += 1;
            }
        }
    }

    /// Walks vertices in order, recording for each page the range of
    /// vertices whose edges touch it. A vertex appears as the last owner of
    /// page p and the first owner of page p+1 only when its edge bytes
    /// straddle the boundary.
    fn init_page_to_vertex_map(&mut self) {
        assert!(self.p2v_map.is_empty());
        self.p2v_map = vec![(0, 0); self.total_pages as usize];

        let mut vid_start: Vid = 0;
        let mut prev_vid: Vid = 0;
        let mut prev_pid: PageId = 0;
        let mut seen_non_empty = false;

        for curr_vid in 0..self.num_nodes as Vid {
            if self.degree(curr_vid) == 0 {
                continue;
            }
            let curr_pid = page_of(self.offset(curr_vid) * EDGE_WIDTH as u64);
            if seen_non_empty && prev_pid < curr_pid {
                self.create_entries(&mut vid_start, prev_vid, curr_vid);
                prev_pid = curr_pid;
            }
            if !seen_non_empty {
                prev_pid = curr_pid;
                vid_start = curr_vid;
                seen_non_empty = true;
            }
            prev_vid = curr_vid;
        }
        if seen_non_empty {
            self.create_entries(&mut vid_start, prev_vid, self.num_nodes as Vid);
        }
    }

    fn create_entries(&mut self, vid_start: &mut Vid, vid: Vid, next_vid: Vid) {
        let degree = self.degree(vid);
        assert!(degree > 0);
        let offset = self.offset(vid) * EDGE_WIDTH as u64;
        let offset_end = offset + degree as u64 * EDGE_WIDTH as u64;

        let mut pid = page_of(offset) as usize;
        self.p2v_map[pid] = (*vid_start, vid);
        pid += 1;
        let last_pid = page_of(offset_end - 1) as usize;
        if pid <= last_pid {
            while pid < last_pid {
                self.p2v_map[pid] = (vid, vid);
                pid += 1;
            }
            if offset_end % PAGE_SIZE as u64 == 0 {
                self.p2v_map[last_pid] = (vid, vid);
            }
        }
        // A vertex ending mid-page stays the first owner of that page.
        *vid_start = if offset_end % PAGE_SIZE as u64 == 0 {
            next_vid
        } else {
            vid
        };
    }

    fn print(&self) {
        let non_empty = self.num_nodes - self.num_empty_nodes;
        println!(
            "V: {} ({} non-empty, {:.1}%)",
            self.num_nodes,
            non_empty,
            if self.num_nodes > 0 {
                non_empty as f64 * 100.0 / self.num_nodes as f64
            } else {
                0.0
            }
        );
        println!("E: {}", self.num_edges);
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> u64 {
        self.num_edges
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn num_pages(&self, device: usize) -> u64 {
        self.devices[device].num_pages
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Out-degree of `v`. O(1): a direct read from the mapped degree array.
    ///
    /// # Arguments
    /// * `v` - Vertex id, must be below `num_nodes`
    ///
    /// # Returns
    /// The number of edge records stored for `v`.
    #[inline]
    pub fn degree(&self, v: Vid) -> u32 {
        let at = self.degrees_offset + v as usize * 4;
        u32::from_le_bytes(self.index_map[at..at + 4].try_into().expect("degree slice"))
    }

    /// Edge-index offset of `v`'s adjacency: the stored base offset of its
    /// 16-vertex group plus the degrees of the vertices before it within
    /// the group. O(16).
    ///
    /// # Arguments
    /// * `v` - Vertex id, must be below `num_nodes`
    ///
    /// # Returns
    /// The index of `v`'s first edge record in the packed edge stream.
    #[inline]
    pub fn offset(&self, v: Vid) -> u64 {
        let group = (v >> 4) as usize;
        let at = GraphHeader::BYTES + group * 8;
        let mut offset =
            u64::from_le_bytes(self.index_map[at..at + 8].try_into().expect("offset slice"));
        let beg = (v >> 4) << 4;
        for u in beg..v {
            offset += self.degree(u) as u64;
        }
        offset
    }

    /// Inclusive global page range spanned by `v`'s edge bytes.
    ///
    /// A range ending exactly on a page boundary still reports the next
    /// page, clamped at the end of the edge region; fetching it is a
    /// harmless overread.
    ///
    /// # Arguments
    /// * `v` - Vertex id whose pages are wanted
    ///
    /// # Returns
    /// `(first_page, last_page)` as global page ids.
    pub fn page_range(&self, v: Vid) -> (PageId, PageId) {
        let degree = self.degree(v) as u64;
        let on_disk_offset = self.offset(v) * EDGE_WIDTH as u64;
        let beg = page_of(on_disk_offset);
        let mut end = page_of(on_disk_offset + degree * EDGE_WIDTH as u64);
        if end as u64 == self.total_pages {
            end -= 1;
        }
        (beg, end)
    }

    /// Vertex range owning global page `pid`.
    ///
    /// # Arguments
    /// * `pid` - Global page id
    ///
    /// # Returns
    /// The lowest and highest vertex whose edge bytes intersect the page.
    #[inline]
    pub fn page_to_vid_range(&self, pid: PageId) -> VidRange {
        self.p2v_map[pid as usize]
    }

    /// Device holding global page `pid`.
    #[inline]
    pub fn device_of_page(&self, pid: PageId) -> usize {
        pid as usize % self.devices.len()
    }

    /// Device-local id of global page `pid`.
    #[inline]
    pub fn local_page_id(&self, pid: PageId) -> PageId {
        pid / self.devices.len() as PageId
    }

    /// Global id of device-local page `local` on `device`.
    #[inline]
    pub fn global_page_id(&self, device: usize, local: PageId) -> PageId {
        local * self.devices.len() as PageId + device as PageId
    }

    pub fn non_empty_nodes(&self) -> &Bitmap {
        &self.non_empty_nodes
    }

    pub fn activated_pages(&self, device: usize) -> &Bitmap {
        &self.devices[device].activated_pages
    }

    /// Clears every device's page activation bitmap. Runs between rounds.
    pub fn reset_page_activation(&self) {
        for device in &self.devices {
            device.activated_pages.reset_parallel();
        }
    }

    /// Reads `num_pages` contiguous device-local pages into `buf`.
    ///
    /// # Arguments
    /// * `device` - Device index the pages live on
    /// * `local_page` - First device-local page of the run
    /// * `num_pages` - Number of contiguous pages to read
    /// * `buf` - Destination buffer of exactly `num_pages * PAGE_SIZE` bytes
    ///
    /// # Panics
    /// * On any read error, including short reads; partial page data is
    ///   never dispatched
    pub fn read_pages(&self, device: usize, local_page: PageId, num_pages: usize, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), num_pages * PAGE_SIZE);
        let dev = &self.devices[device];
        let offset = local_page as u64 * PAGE_SIZE as u64;
        read_exact_at(&dev.file, buf, offset).unwrap_or_else(|e| {
            panic!(
                "read of {} pages at {} from {} failed: {}",
                num_pages,
                offset,
                dev.path.display(),
                e
            )
        });
    }

    /// Reads the adjacency of one vertex through buffered handles. Intended
    /// for verification and tests, not the hot path.
    ///
    /// # Arguments
    /// * `v` - Vertex whose edges are wanted
    ///
    /// # Returns
    /// The destination ids of `v`'s edges in storage order; empty when `v`
    /// has no edges.
    pub fn edges_of(&self, v: Vid) -> Vec<Vid> {
        let degree = self.degree(v) as usize;
        if degree == 0 {
            return Vec::new();
        }
        let on_disk_offset = self.offset(v) * EDGE_WIDTH as u64;
        let (pid, pid_end) = self.page_range(v);

        let mut buf = vec![0u8; (pid_end - pid + 1) as usize * PAGE_SIZE];
        for (i, p) in (pid..=pid_end).enumerate() {
            let device = self.device_of_page(p);
            let local = self.local_page_id(p);
            let file = File::open(&self.devices[device].path).unwrap_or_else(|e| {
                panic!("cannot reopen {}: {}", self.devices[device].path.display(), e)
            });
            let chunk = &mut buf[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];
            read_exact_at(&file, chunk, local as u64 * PAGE_SIZE as u64)
                .unwrap_or_else(|e| panic!("debug page read failed: {}", e));
        }

        let beg = offset_in_page(on_disk_offset);
        buf[beg..beg + degree * EDGE_WIDTH]
            .chunks_exact(EDGE_WIDTH)
            .map(|c| Vid::from_le_bytes(c.try_into().expect("edge record")))
            .collect()
    }
}

/// Opens an adjacency file for unbuffered reads when the filesystem allows
/// it, falling back to a plain descriptor otherwise.
///
/// # Arguments
/// * `path` - The adjacency file to open read-only
///
/// # Returns
/// An open read handle.
///
/// # Panics
/// * If the file cannot be opened at all
fn open_adjacency_file(path: &Path) -> File {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Ok(file) = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
        {
            return file;
        }
    }
    File::open(path).unwrap_or_else(|e| panic!("cannot open adj file {}: {}", path.display(), e))
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0usize;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read",
            ));
        }
        done += n;
    }
    Ok(())
}
