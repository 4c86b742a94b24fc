use etcd_repository::{config::RepositoryConfig, repository::EtcdRepository};

pub async fn get_repository() -> EtcdRepository {
    let config = RepositoryConfig::new(["http://localhost:2379"]);
    EtcdRepository::connect(config)
        .await
        .expect("failed to connect to etcd")
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
