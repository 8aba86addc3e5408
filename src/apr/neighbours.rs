//! Face-neighbour search across resolution levels.
//!
//! A cell has at most one same-level or coarser neighbour across a face, or
//! up to four finer ones: the children of the adjacent position that touch
//! the shared face. Searches record what they found on the querying
//! iterator; a second iterator is then positioned on one of the results with
//! [`CellIterator::set_neighbour_iterator`].

use super::{CellIterator, Face, LevelDelta};

/// Result of the most recent neighbour search of an iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourNodes {
    face: Option<Face>,
    delta: LevelDelta,
    count: u8,
    nodes: [usize; 4],
}

impl Default for NeighbourNodes {
    fn default() -> Self {
        Self {
            face: None,
            delta: LevelDelta::Same,
            count: 0,
            nodes: [0; 4],
        }
    }
}

impl NeighbourNodes {
    fn new(face: Face, delta: LevelDelta) -> Self {
        Self {
            face: Some(face),
            delta,
            ..Self::default()
        }
    }

    fn push(&mut self, node: usize) {
        self.nodes[self.count as usize] = node;
        self.count += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn face(&self) -> Option<Face> {
        self.face
    }

    pub fn level_delta(&self) -> LevelDelta {
        self.delta
    }

    /// Node indices of the neighbours found.
    pub fn as_slice(&self) -> &[usize] {
        &self.nodes[..self.count as usize]
    }
}

impl<'a> CellIterator<'a> {
    /// Neighbours of the current cell across `face` at resolution `delta`,
    /// without touching the iterator's recorded search.
    pub fn neighbour_nodes(&self, face: Face, delta: LevelDelta) -> NeighbourNodes {
        let cursor = *self.cursor();
        let topology = self.topology;
        let mut found = NeighbourNodes::new(face, delta);

        let (dy, dx, dz) = face.offset();
        let (y_num, x_num, z_num) = topology.shape(cursor.level);
        let ny = cursor.y as i64 + dy;
        let nx = cursor.x as i64 + dx;
        let nz = cursor.z as i64 + dz;
        if ny < 0
            || nx < 0
            || nz < 0
            || ny >= y_num as i64
            || nx >= x_num as i64
            || nz >= z_num as i64
        {
            return found;
        }
        let (ny, nx, nz) = (ny as u32, nx as u32, nz as u32);

        match delta {
            LevelDelta::Same => {
                if let Some(node) = topology.find_node(cursor.level, nx, ny, nz) {
                    found.push(node);
                }
            }
            LevelDelta::Coarser => {
                if cursor.level <= topology.level_min() {
                    return found;
                }
                let own = [cursor.y, cursor.x, cursor.z];
                let moved = [ny, nx, nz];
                // Same parent along the face axis means the coarser cell
                // contains this one rather than touching it.
                if own[face.axis()] / 2 == moved[face.axis()] / 2 {
                    return found;
                }
                if let Some(node) = topology.find_node(cursor.level - 1, nx / 2, ny / 2, nz / 2) {
                    found.push(node);
                }
            }
            LevelDelta::Finer => {
                if cursor.level >= topology.level_max() {
                    return found;
                }
                let level = cursor.level + 1;
                // Child layer of the adjacent position facing this cell.
                let near = if face.is_positive() { 0 } else { 1 };
                let base = [2 * ny, 2 * nx, 2 * nz];
                let axis = face.axis();
                let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
                for i in 0..2 {
                    for j in 0..2 {
                        let mut p = base;
                        p[axis] += near;
                        p[a] += i;
                        p[b] += j;
                        if let Some(node) = topology.find_node(level, p[1], p[0], p[2]) {
                            found.push(node);
                        }
                    }
                }
            }
        }
        found
    }

    /// Search across `face` at exactly `delta` and record the result.
    /// Returns the number of neighbours found.
    pub fn find_neighbours(&mut self, face: Face, delta: LevelDelta) -> usize {
        self.found = self.neighbour_nodes(face, delta);
        self.found.len()
    }

    /// Search across `face` trying same level, then coarser, then finer.
    /// The first non-empty result is recorded; returns its size.
    pub fn find_neighbours_in_direction(&mut self, face: Face) -> usize {
        for delta in LevelDelta::ALL {
            let found = self.neighbour_nodes(face, delta);
            if !found.is_empty() {
                self.found = found;
                return found.len();
            }
        }
        self.found = NeighbourNodes::new(face, LevelDelta::Same);
        0
    }

    pub fn find_neighbours_same_level(&mut self, face: Face) -> bool {
        self.find_neighbours(face, LevelDelta::Same) > 0
    }

    /// The recorded result of the last search.
    pub fn neighbours(&self) -> &NeighbourNodes {
        &self.found
    }

    pub fn number_neighbours_in_direction(&self, face: Face) -> usize {
        if self.found.face == Some(face) {
            self.found.len()
        } else {
            0
        }
    }

    pub fn neighbour_level_delta(&self) -> LevelDelta {
        self.found.delta
    }

    /// Position this iterator on neighbour `index` found by `origin` across
    /// `face`. Returns false and leaves this iterator untouched if `origin`
    /// has no such neighbour or walks a different structure.
    pub fn set_neighbour_iterator(&mut self, origin: &CellIterator<'_>, face: Face, index: usize) -> bool {
        if !std::ptr::eq(self.topology, origin.topology) {
            return false;
        }
        if origin.found.face != Some(face) || index >= origin.found.len() {
            return false;
        }
        self.position_node(origin.found.nodes[index])
    }

    /// Position this tree iterator on the parent of `child`'s cell.
    ///
    /// `child` may walk the APR or the tree itself. Returns false when the
    /// child is at the coarsest level of this structure.
    pub fn set_iterator_to_parent(&mut self, child: &CellIterator<'_>) -> bool {
        let level = child.level();
        if level <= self.topology.level_min() {
            return false;
        }
        match self
            .topology
            .find_node(level - 1, child.x() / 2, child.y() / 2, child.z() / 2)
        {
            Some(node) => self.position_node(node),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apr::{AprBuilder, ImageDims};

    #[test]
    fn test_same_level_neighbours() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 2, 2, |_, _, _| 2).unwrap();
        let mut it = apr.iterator();
        let mut neighbour = apr.iterator();
        assert!(it.set_iterator_to_cell(2, 1, 1, 0));

        assert!(it.find_neighbours_same_level(Face::PlusY));
        assert!(neighbour.set_neighbour_iterator(&it, Face::PlusY, 0));
        assert_eq!((neighbour.x(), neighbour.y()), (1, 2));

        assert!(it.find_neighbours_same_level(Face::MinusX));
        assert!(neighbour.set_neighbour_iterator(&it, Face::MinusX, 0));
        assert_eq!((neighbour.x(), neighbour.y()), (0, 1));

        assert!(!it.find_neighbours_same_level(Face::PlusZ));
        assert!(!neighbour.set_neighbour_iterator(&it, Face::PlusZ, 0));
        assert_eq!((neighbour.x(), neighbour.y()), (0, 1));
    }

    #[test]
    fn test_image_edge_has_no_neighbours() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 4), 1, 2, |_, _, _| 2).unwrap();
        let mut it = apr.iterator();
        assert!(it.set_iterator_to_cell(2, 0, 0, 0));
        for face in [Face::MinusY, Face::MinusX, Face::MinusZ] {
            assert_eq!(it.find_neighbours_in_direction(face), 0);
            assert_eq!(it.number_neighbours_in_direction(face), 0);
        }
    }

    #[test]
    fn test_coarse_and_fine_neighbours() {
        // Left half of the image fine (level 2), right half coarse (level 1).
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 4), 1, 2, |_, x, _| {
            if x < 2 { 2 } else { 1 }
        })
        .unwrap();

        let mut fine = apr.iterator();
        assert!(fine.set_iterator_to_cell(2, 1, 3, 2));
        assert_eq!(fine.find_neighbours(Face::PlusX, LevelDelta::Same), 0);
        assert_eq!(fine.find_neighbours_in_direction(Face::PlusX), 1);
        assert_eq!(fine.neighbour_level_delta(), LevelDelta::Coarser);
        let mut coarse = apr.iterator();
        assert!(coarse.set_neighbour_iterator(&fine, Face::PlusX, 0));
        assert_eq!((coarse.level(), coarse.x(), coarse.y(), coarse.z()), (1, 1, 1, 1));

        assert_eq!(coarse.find_neighbours_in_direction(Face::MinusX), 4);
        assert_eq!(coarse.neighbour_level_delta(), LevelDelta::Finer);
        let mut child = apr.iterator();
        for i in 0..4 {
            assert!(child.set_neighbour_iterator(&coarse, Face::MinusX, i));
            assert_eq!(child.level(), 2);
            assert_eq!(child.x(), 1);
            assert!(child.y() >= 2 && child.z() >= 2);
        }
        assert!(!child.set_neighbour_iterator(&coarse, Face::MinusX, 4));
    }

    #[test]
    fn test_coarser_search_does_not_return_container() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 8), 1, 3, |_, _, _| 3).unwrap();
        let tree = apr.tree().unwrap();
        let mut it = tree.iterator();
        assert!(it.set_iterator_to_cell(2, 1, 1, 1));

        // Moving -y stays inside the parent, which contains the node.
        assert_eq!(it.find_neighbours(Face::MinusY, LevelDelta::Coarser), 0);
        // Moving +y crosses into the next parent.
        assert_eq!(it.find_neighbours(Face::PlusY, LevelDelta::Coarser), 1);
        let mut coarse = tree.iterator();
        assert!(coarse.set_neighbour_iterator(&it, Face::PlusY, 0));
        assert_eq!((coarse.level(), coarse.x(), coarse.y(), coarse.z()), (1, 0, 1, 0));
    }

    #[test]
    fn test_neighbour_relation_is_symmetric() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(8, 8, 8), 1, 3, |y, x, z| {
            if (y as i32 - 3).abs() + (x as i32 - 4).abs() + (z as i32 - 2).abs() < 4 { 3 } else { 1 }
        })
        .unwrap();
        let mut it = apr.iterator();
        let mut neighbour = apr.iterator();
        let mut more = it.begin();
        while more {
            for face in Face::ALL {
                let n = it.find_neighbours_in_direction(face);
                for i in 0..n {
                    assert!(neighbour.set_neighbour_iterator(&it, face, i));
                    let back = neighbour.find_neighbours_in_direction(face.opposite());
                    assert!(back > 0);
                    assert!(
                        neighbour
                            .neighbours()
                            .as_slice()
                            .contains(&it.node_index())
                    );
                }
            }
            more = it.it_forward();
        }
    }

    #[test]
    fn test_neighbour_iterator_requires_same_structure() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 2, 2, |_, _, _| 2).unwrap();
        let other = AprBuilder::from_level_fn(ImageDims::new(4, 4, 1), 2, 2, |_, _, _| 2).unwrap();
        let mut it = apr.iterator();
        assert!(it.set_iterator_to_cell(2, 1, 1, 0));
        assert!(it.find_neighbours_same_level(Face::PlusY));

        let mut foreign = other.iterator();
        assert!(foreign.set_iterator_to_cell(2, 3, 3, 0));
        assert!(!foreign.set_neighbour_iterator(&it, Face::PlusY, 0));
        assert_eq!((foreign.x(), foreign.y()), (3, 3));

        let mut local = apr.iterator();
        assert!(local.set_neighbour_iterator(&it, Face::PlusY, 0));
        assert_eq!((local.x(), local.y()), (1, 2));
    }

    #[test]
    fn test_parent_lookup() {
        let apr = AprBuilder::from_level_fn(ImageDims::new(4, 2, 1), 0, 1, |y, _, _| {
            if y >= 2 { 1 } else { 0 }
        })
        .unwrap();
        let tree = apr.tree().unwrap();
        let mut it = apr.iterator();
        let mut parent = tree.iterator();

        assert!(it.begin());
        assert_eq!(it.level(), 0);
        assert!(!parent.set_iterator_to_parent(&it));

        assert!(it.it_forward());
        assert_eq!(it.level(), 1);
        assert!(parent.set_iterator_to_parent(&it));
        assert_eq!((parent.level(), parent.x(), parent.y(), parent.z()), (0, 0, 1, 0));

        let mut grandparent = tree.iterator();
        assert!(!grandparent.set_iterator_to_parent(&parent));
    }
}
